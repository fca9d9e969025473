use dashmap::DashMap;
use tower_lsp::lsp_types::{Position, Range};

pub type DocumentStore = DashMap<String, Document>;

type LineOffset = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentLanguage {
    Xml,
    Lua,
    Other,
}

impl DocumentLanguage {
    pub fn from_language_id(language_id: &str) -> Self {
        match language_id {
            "xml" => DocumentLanguage::Xml,
            "lua" => DocumentLanguage::Lua,
            _ => DocumentLanguage::Other,
        }
    }

    /// Guess from the file extension, for buffers seen without an open event.
    pub fn from_path(path: &str) -> Self {
        match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
            Some(ext) if ext == "xml" => DocumentLanguage::Xml,
            Some(ext) if ext == "lua" => DocumentLanguage::Lua,
            _ => DocumentLanguage::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    language: DocumentLanguage,
    line_index: LineIndex,
}

impl Document {
    pub fn new(text: String, language: DocumentLanguage) -> Self {
        let line_index = LineIndex::new(&text);
        Self {
            text,
            language,
            line_index,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> DocumentLanguage {
        self.language
    }

    pub fn offset(&self, position: Position) -> Option<usize> {
        self.line_index.offset(&self.text, position)
    }

    pub fn position_at(&self, byte_offset: usize) -> Position {
        self.line_index.position_at(&self.text, byte_offset)
    }

    pub fn range_of(&self, start: usize, end: usize) -> Range {
        Range {
            start: self.position_at(start),
            end: self.position_at(end),
        }
    }

    pub fn slice(&self, range: Range) -> Option<&str> {
        let start = self.offset(range.start)?;
        let end = self.offset(range.end)?;
        self.text.get(start..end)
    }

    /// Range of the byte span `start..end` of `line`.
    pub fn line_span(&self, line: u32, start: usize, end: usize) -> Option<Range> {
        let (line_start, _) = self.line_index.line_bounds(&self.text, line as usize)?;
        Some(self.range_of(line_start + start, line_start + end))
    }

    /// Text of `line` without its line break.
    pub fn line(&self, line: u32) -> Option<&str> {
        let (start, end) = self.line_index.line_bounds(&self.text, line as usize)?;
        Some(&self.text[start..end])
    }

    /// Text from the start of the line up to `position`.
    pub fn line_text_before(&self, position: Position) -> Option<&str> {
        let offset = self.offset(position)?;
        let (start, _) = self
            .line_index
            .line_bounds(&self.text, position.line as usize)?;
        self.text.get(start..offset)
    }
}

#[derive(Debug, Clone)]
struct LineIndex {
    line_starts: Vec<LineOffset>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (idx, ch) in text.char_indices() {
            if ch == '\n' {
                line_starts.push(idx + 1);
            }
        }
        Self { line_starts }
    }

    fn line_bounds(&self, text: &str, line: usize) -> Option<(usize, usize)> {
        let line_start = *self.line_starts.get(line)?;
        let mut line_end = self
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or_else(|| text.len());
        let slice = &text[line_start..line_end];
        if slice.ends_with("\r\n") {
            line_end -= 2;
        } else if slice.ends_with('\n') {
            line_end -= 1;
        }
        Some((line_start, line_end))
    }

    fn offset(&self, text: &str, position: Position) -> Option<usize> {
        let (line_start, line_end) = self.line_bounds(text, position.line as usize)?;
        let line_slice = &text[line_start..line_end];

        let mut current_units = 0u32;
        for (byte_idx, ch) in line_slice.char_indices() {
            if current_units == position.character {
                return Some(line_start + byte_idx);
            }
            current_units += ch.len_utf16() as u32;
        }

        if current_units == position.character {
            return Some(line_start + line_slice.len());
        }

        None
    }

    fn position_at(&self, text: &str, byte_offset: usize) -> Position {
        let clamped = byte_offset.min(text.len());
        let line = self.line_for_offset(clamped);
        let line_start = *self.line_starts.get(line).unwrap_or(&0);
        let line_slice = text.get(line_start..clamped).unwrap_or_default();
        let column_units = line_slice.chars().map(|ch| ch.len_utf16() as u32).sum();

        Position {
            line: line as u32,
            character: column_units,
        }
    }

    fn line_for_offset(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next_line) => next_line.saturating_sub(1),
        }
    }
}

pub(crate) fn range_contains(range: &Range, position: Position) -> bool {
    if position.line < range.start.line || position.line > range.end.line {
        return false;
    }
    if position.line == range.start.line && position.character < range.start.character {
        return false;
    }
    if position.line == range.end.line && position.character > range.end.character {
        return false;
    }
    true
}

/// Byte range of the run of characters accepted by `is_part` that touches
/// `column` (a UTF-16 column) on `line`.
pub(crate) fn run_at(line: &str, column: u32, is_part: impl Fn(char) -> bool) -> Option<(usize, usize)> {
    let cursor = column_to_byte(line, column);

    let start = line[..cursor]
        .char_indices()
        .rev()
        .take_while(|(_, ch)| is_part(*ch))
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(cursor);
    let end = line[cursor..]
        .char_indices()
        .find(|(_, ch)| !is_part(*ch))
        .map(|(idx, _)| cursor + idx)
        .unwrap_or(line.len());

    if start == end {
        None
    } else {
        Some((start, end))
    }
}

/// Byte offset of a UTF-16 column within `line`, clamped to its end.
pub(crate) fn column_to_byte(line: &str, column: u32) -> usize {
    let mut units = 0u32;
    for (idx, ch) in line.char_indices() {
        if units >= column {
            return idx;
        }
        units += ch.len_utf16() as u32;
    }
    line.len()
}
