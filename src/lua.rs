//! Function index built from the `ffi.cdef` blocks of the game's UI Lua files.

use crate::error::read_file;
use crate::text::column_to_byte;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, Documentation, MarkupContent, MarkupKind,
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

static CDEF_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)local\s+ffi\s*=\s*require\("ffi"\)\s*local\s+C\s*=\s*ffi\.C\s*ffi\.cdef\[\[(.*?)\]\]"#,
    )
    .expect("valid cdef block pattern")
});
static TYPEDEF_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^typedef\s+(struct|enum|union)\s*\{\s*$").expect("valid typedef start"));
static TYPEDEF_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\}\s+(\w+);$").expect("valid typedef end"));
static TYPEDEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^typedef\s+(struct|enum|union|\w+)(\s+\{.*\}|\s+)\s*(\w+);$").expect("valid typedef")
});
static FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:([\w\s*]+)\s+)?(\w+)\s*\((.*?)\);$").expect("valid function prototype")
});
static HOVER_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:C\.)?\w+\b").expect("valid Lua word"));

pub const FUNCTION_DETAIL: &str = "EGOSOFT Lua Function";

#[derive(Debug, Clone, Default)]
pub struct LuaIndex {
    types: IndexMap<String, String>,
    functions: IndexMap<String, String>,
}

impl LuaIndex {
    /// Scans every `*.lua` below `ui_folder`.
    pub fn load(ui_folder: &Path) -> Self {
        let mut index = Self::default();
        if !ui_folder.is_dir() {
            warn!("UI folder not found at {}", ui_folder.display());
            return index;
        }

        let mut files: Vec<PathBuf> = WalkDir::new(ui_folder)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("lua"))
            .collect();
        files.sort();

        for path in files {
            match read_file(&path) {
                Ok(content) => index.parse_source(&content),
                Err(err) => warn!("{err}"),
            }
        }
        info!(
            functions = index.functions.len(),
            types = index.types.len(),
            "loaded Lua definitions"
        );
        index
    }

    /// Parses the `ffi.cdef` block of one Lua source, if it has one.
    pub fn parse_source(&mut self, content: &str) {
        let Some(block) = CDEF_BLOCK
            .captures(content)
            .and_then(|captures| captures.get(1))
        else {
            return;
        };
        let lines: Vec<&str> = block
            .as_str()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        self.parse_lines(&lines);
    }

    fn parse_lines(&mut self, lines: &[&str]) {
        let mut typedef_buffer: Vec<&str> = Vec::new();

        for &line in lines {
            let starts = TYPEDEF_START.is_match(line);
            let single = TYPEDEF.is_match(line);
            if !typedef_buffer.is_empty() || starts || single {
                if !typedef_buffer.is_empty() || starts {
                    typedef_buffer.push(line);
                }
                if TYPEDEF_END.is_match(line) || single {
                    let content = if typedef_buffer.is_empty() {
                        line.to_string()
                    } else {
                        typedef_buffer.join(" ")
                    };
                    self.add_typedef(&content);
                    typedef_buffer.clear();
                }
                continue;
            }

            if let Some(captures) = FUNCTION.captures(line) {
                let return_type = captures
                    .get(1)
                    .map(|ret| ret.as_str().trim())
                    .filter(|ret| !ret.is_empty())
                    .unwrap_or("void");
                let name = captures.get(2).map_or("", |name| name.as_str());
                let parameters = captures.get(3).map_or("", |params| params.as_str());
                self.add_function(return_type, name, parameters);
            }
        }
    }

    fn add_typedef(&mut self, content: &str) {
        let Some(name) = TYPEDEF
            .captures(content)
            .and_then(|captures| captures.get(3))
            .map(|name| name.as_str())
        else {
            debug!(content, "unrecognised typedef");
            return;
        };
        let description = content.replacen(name, &format!("`{name}`"), 1);
        self.types.insert(name.to_string(), description);
    }

    fn add_function(&mut self, return_type: &str, name: &str, parameters: &str) {
        let qualified = format!("C.{name}");
        if self.functions.contains_key(&qualified) {
            return;
        }

        let params: Vec<&str> = parameters
            .split(',')
            .map(str::trim)
            .filter(|param| !param.is_empty())
            .collect();
        let formatted: Vec<String> = params.iter().map(|param| mark_parameter_name(param)).collect();
        let mut description = format!("{return_type} `{qualified}`({})\n", formatted.join(", "));

        if let Some(type_description) = self.types.get(return_type) {
            description.push_str(&format!("\n***\n{type_description}"));
        }

        let mut first = true;
        for param_type in params.iter().filter_map(|param| parameter_type(param)) {
            if let Some(type_description) = self.types.get(param_type) {
                if first {
                    description.push('\n');
                    first = false;
                }
                description.push_str(&format!("- {type_description}\n"));
            }
        }

        self.functions.insert(qualified, description);
    }

    pub fn function(&self, name: &str) -> Option<&str> {
        self.functions.get(name).map(String::as_str)
    }

    pub fn type_description(&self, name: &str) -> Option<&str> {
        self.types.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn completion_items(&self) -> Vec<CompletionItem> {
        self.functions
            .iter()
            .map(|(name, description)| CompletionItem {
                label: name.clone(),
                kind: Some(CompletionItemKind::FUNCTION),
                detail: Some(FUNCTION_DETAIL.to_string()),
                documentation: Some(Documentation::MarkupContent(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: description.clone(),
                })),
                ..CompletionItem::default()
            })
            .collect()
    }

    /// Description of the `C.name` word covering `column`, with its byte span.
    pub fn describe_at(&self, line: &str, column: u32) -> Option<(&str, usize, usize)> {
        let cursor = column_to_byte(line, column);
        let word = HOVER_WORD
            .find_iter(line)
            .find(|word| word.start() <= cursor && cursor <= word.end())?;
        let description = self.function(word.as_str())?;
        Some((description, word.start(), word.end()))
    }
}

/// Wraps the trailing name of a `type name` parameter in backticks.
fn mark_parameter_name(param: &str) -> String {
    let tokens: Vec<&str> = param.split_whitespace().collect();
    match tokens.split_last() {
        Some((name, rest)) if !rest.is_empty() => format!("{} `{name}`", rest.join(" ")),
        _ => param.to_string(),
    }
}

/// Base type of a parameter, without qualifiers or pointer marks.
fn parameter_type(param: &str) -> Option<&str> {
    let tokens: Vec<&str> = param.split_whitespace().collect();
    let type_tokens = match tokens.split_last() {
        Some((_, rest)) if !rest.is_empty() => rest,
        _ => tokens.as_slice(),
    };
    let base = type_tokens
        .iter()
        .copied()
        .find(|token| *token != "const")?
        .trim_end_matches('*');
    (base != "void" && !base.is_empty()).then_some(base)
}
