//! Localized text from the game's `t/0001*.xml` language files.

use crate::error::{read_file, Error, Result};
use crate::text::column_to_byte;
use crate::xml::{unescape, ScanEvent, TagScanner};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

static LANGUAGE_FILE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"0001-[lL]?(\d+)\.xml").expect("valid language file pattern"));
static SCRIPT_REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\{\s*(\d+)\s*,\s*(\d+)\s*\}|readtext\.\{\s*(\d+)\s*\}\.\{\s*(\d+)\s*\}|page="(\d+)"\s+line="(\d+)""#,
    )
    .expect("valid script text reference pattern")
});
static LUA_REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"ReadText\s*\(\s*(\d+),\s*(\d+)\s*\)").expect("valid Lua text reference pattern")
});

/// Language id used for files without a numeric suffix.
pub const ANY_LANGUAGE: &str = "*";
const ENGLISH: &str = "44";

/// Language id encoded in a `0001-L044.xml` style file name.
pub fn language_id(file_name: &str) -> String {
    match LANGUAGE_FILE_PATTERN
        .captures(file_name)
        .and_then(|captures| captures.get(1))
    {
        Some(digits) => {
            let trimmed = digits.as_str().trim_start_matches('0');
            if trimmed.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        }
        None => ANY_LANGUAGE.to_string(),
    }
}

fn language_order(language: &str) -> u64 {
    if language == ANY_LANGUAGE {
        0
    } else {
        language.parse().unwrap_or(u64::MAX)
    }
}

/// `<unpacked>/t` plus `<extensions>/<each subdir>/t`, where present.
pub fn language_folders(unpacked: &Path, extensions: &Path) -> Vec<PathBuf> {
    let mut folders = Vec::new();
    let root = unpacked.join("t");
    if root.is_dir() {
        folders.push(root);
    }
    if extensions.is_dir() {
        let mut extension_dirs: Vec<PathBuf> = WalkDir::new(extensions)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path().join("t"))
            .filter(|path| path.is_dir())
            .collect();
        extension_dirs.sort();
        folders.extend(extension_dirs);
    }
    folders
}

#[derive(Debug, Clone, Default)]
pub struct LanguageTexts {
    /// `"page:t"` -> language id -> text.
    entries: HashMap<String, IndexMap<String, String>>,
    preferred: String,
    limit: bool,
}

impl LanguageTexts {
    pub fn new(preferred: &str, limit: bool) -> Self {
        Self {
            entries: HashMap::new(),
            preferred: preferred.to_string(),
            limit,
        }
    }

    /// Loads every `0001*.xml` file directly inside `folders`.
    pub fn load(folders: &[PathBuf], preferred: &str, limit: bool) -> Self {
        let mut texts = Self::new(preferred, limit);
        let mut files = 0usize;
        for folder in folders {
            let mut paths: Vec<PathBuf> = WalkDir::new(folder)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with("0001") && name.ends_with(".xml"))
                })
                .collect();
            paths.sort();

            for path in paths {
                let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                    continue;
                };
                let language = language_id(file_name);
                if !texts.accepts(&language) {
                    debug!("skipping {} (language {language})", path.display());
                    continue;
                }
                match texts.load_file(&path, &language) {
                    Ok(()) => files += 1,
                    Err(err) => warn!("{err}"),
                }
            }
        }
        info!(
            files,
            folders = folders.len(),
            entries = texts.entries.len(),
            "loaded language files"
        );
        texts
    }

    fn accepts(&self, language: &str) -> bool {
        !self.limit || language == self.preferred || language == ANY_LANGUAGE || language == ENGLISH
    }

    fn load_file(&mut self, path: &Path, language: &str) -> Result<()> {
        let text = read_file(path)?;
        self.parse(&text, language).map_err(|source| Error::Xml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Collects `<page id><t id>text</t></page>`; entries read before an error are kept.
    pub fn parse(&mut self, text: &str, language: &str) -> std::result::Result<(), xmlparser::Error> {
        let mut page: Option<String> = None;
        let mut text_id: Option<String> = None;
        let mut first_error = None;

        for event in TagScanner::new(text) {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    first_error.get_or_insert(err);
                    continue;
                }
            };
            match event {
                ScanEvent::Open(tag) if tag.name == "page" => {
                    page = tag.decoded("id");
                }
                ScanEvent::Open(tag) if tag.name == "t" && page.is_some() => {
                    text_id = tag.decoded("id");
                }
                ScanEvent::Text(content) => {
                    if let (Some(page), Some(text_id)) = (&page, &text_id) {
                        let value = unescape(content);
                        let value = value.trim();
                        if !value.is_empty() {
                            self.insert(page, text_id, language, value);
                        }
                    }
                }
                ScanEvent::Close("t") => text_id = None,
                ScanEvent::Close("page") => page = None,
                _ => {}
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn insert(&mut self, page: &str, text_id: &str, language: &str, text: &str) {
        self.entries
            .entry(format!("{page}:{text_id}"))
            .or_default()
            .insert(language.to_string(), text.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `"<lang>: <text>"` blocks, preferred language first, then by number.
    pub fn find_text(&self, page: &str, text_id: &str) -> Option<String> {
        let texts = self.entries.get(&format!("{page}:{text_id}"))?;

        let mut languages: Vec<&String> = texts.keys().collect();
        languages.sort_by_key(|language| (**language != self.preferred, language_order(language)));

        let shown = if !self.limit {
            None
        } else if texts.contains_key(&self.preferred) {
            Some(self.preferred.as_str())
        } else if texts.contains_key(ANY_LANGUAGE) {
            Some(ANY_LANGUAGE)
        } else if texts.contains_key(ENGLISH) {
            Some(ENGLISH)
        } else {
            Some(self.preferred.as_str())
        };

        let blocks: Vec<String> = languages
            .into_iter()
            .filter(|language| shown.map_or(true, |shown| language.as_str() == shown))
            .map(|language| format!("{language}: {}", texts[language]))
            .collect();
        if blocks.is_empty() {
            None
        } else {
            Some(blocks.join("\n\n"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSyntax {
    Script,
    Lua,
}

impl ReferenceSyntax {
    fn pattern(self) -> &'static Regex {
        match self {
            ReferenceSyntax::Script => &SCRIPT_REFERENCE_PATTERN,
            ReferenceSyntax::Lua => &LUA_REFERENCE_PATTERN,
        }
    }
}

/// A `(page, t)` reference on one line, as byte offsets into that line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextReference {
    pub page: String,
    pub text_id: String,
    pub start: usize,
    pub end: usize,
}

/// The text reference on `line` that contains the UTF-16 `column`.
pub fn reference_at(line: &str, column: u32, syntax: ReferenceSyntax) -> Option<TextReference> {
    let cursor = column_to_byte(line, column);
    syntax.pattern().captures_iter(line).find_map(|captures| {
        let whole = captures.get(0)?;
        if cursor < whole.start() || cursor > whole.end() {
            return None;
        }
        let mut groups = captures.iter().skip(1).flatten();
        let page = groups.next()?;
        let text_id = groups.next()?;
        Some(TextReference {
            page: page.as_str().to_string(),
            text_id: text_id.as_str().to_string(),
            start: whole.start(),
            end: whole.end(),
        })
    })
}
