use crate::backend::Backend;
use crate::completion::{locate_path_context, resolve, to_completion_items};
use crate::hover::{hover_target, schema_hover};
use crate::language::{reference_at, ReferenceSyntax};
use crate::scanner::{detect_dialect, extract_variables, Dialect};
use crate::text::{run_at, Document, DocumentLanguage};
use crate::variables::{normalize, DocumentVariables, VariableMatch};
use std::collections::HashMap;
use tower_lsp::lsp_types::{
    CompletionList, CompletionResponse, Hover, HoverContents, Location, MarkupContent,
    MarkupKind, Position, Range, TextEdit, Url, WorkspaceEdit,
};
use tracing::{debug, trace};

impl Backend {
    /// Dialect of an XML document; only positive detections are cached.
    pub(crate) fn script_dialect(&self, uri: &Url, document: &Document) -> Option<Dialect> {
        if document.language() != DocumentLanguage::Xml {
            return None;
        }
        if let Some(dialect) = self.dialects.get(uri.as_str()) {
            return Some(*dialect);
        }
        let dialect = detect_dialect(document.text())?;
        debug!(%uri, dialect = dialect.label(), "classified document");
        self.dialects.insert(uri.to_string(), dialect);
        Some(dialect)
    }

    /// Rebuilds the variable table of `uri` from its current text.
    pub(crate) fn analyze_document(&self, uri: &Url) {
        let Some(document) = self.documents.get(uri.as_str()) else {
            return;
        };
        let Some(dialect) = self.script_dialect(uri, &document) else {
            self.variables.clear(uri);
            return;
        };

        let mut variables = DocumentVariables::new(dialect);
        for occurrence in extract_variables(document.text()) {
            let location = Location {
                uri: uri.clone(),
                range: document.range_of(occurrence.start, occurrence.end),
            };
            variables.record(occurrence.kind, &occurrence.name, location);
        }
        if variables.is_empty() {
            trace!(%uri, "no variables in document");
        }
        self.variables.replace(uri, variables);
    }

    fn variable_at(&self, uri: &Url, position: Position) -> Option<VariableMatch> {
        self.variables.lookup_at(uri, position)
    }

    pub(crate) fn completion_at(&self, uri: &Url, position: Position) -> Option<CompletionResponse> {
        if !self.is_ready() {
            return None;
        }
        let document = self.documents.get(uri.as_str())?;

        match document.language() {
            DocumentLanguage::Lua => {
                let items = self.lua.read().completion_items();
                (!items.is_empty()).then_some(CompletionResponse::Array(items))
            }
            DocumentLanguage::Xml => {
                self.script_dialect(uri, &document)?;
                let before = document.line_text_before(position)?;
                let context = locate_path_context(before)?;
                let verbose = self.verbose();
                if verbose {
                    debug!(previous = %context.previous, current = %context.current, "completion context");
                }

                let schema = self.schema.read().clone();
                let candidates = resolve(&schema.registry, &context, verbose);
                if candidates.is_empty() {
                    return None;
                }
                Some(CompletionResponse::List(CompletionList {
                    is_incomplete: true,
                    items: to_completion_items(candidates),
                }))
            }
            DocumentLanguage::Other => None,
        }
    }

    pub(crate) fn hover_at(&self, uri: &Url, position: Position) -> Option<Hover> {
        if !self.is_ready() {
            return None;
        }
        let document = self.documents.get(uri.as_str())?;

        match document.language() {
            DocumentLanguage::Xml => {
                let dialect = self.script_dialect(uri, &document)?;
                self.script_hover(uri, &document, dialect, position)
            }
            DocumentLanguage::Lua => self.lua_hover(&document, position),
            DocumentLanguage::Other => None,
        }
    }

    fn script_hover(
        &self,
        uri: &Url,
        document: &Document,
        dialect: Dialect,
        position: Position,
    ) -> Option<Hover> {
        let line = document.line(position.line)?;

        if let Some(reference) = reference_at(line, position.character, ReferenceSyntax::Script) {
            let text = self.texts.read().find_text(&reference.page, &reference.text_id);
            debug!(page = %reference.page, t = %reference.text_id, found = text.is_some(), "text reference");
            let range = document.line_span(position.line, reference.start, reference.end);
            return text.map(|text| plaintext_hover(&text, range));
        }

        if let Some(variable) = self.variable_at(uri, position) {
            let value = format!(
                "{} {}: `{}`",
                dialect.label(),
                variable.kind.label(),
                variable.name
            );
            return Some(markdown_hover(value, Some(variable.location.range)));
        }

        let target = hover_target(line, position.character)?;
        if self.verbose() {
            debug!(word = %target.word, parts = ?target.parts, "schema hover");
        }
        let schema = self.schema.read().clone();
        let text = schema_hover(&schema.schema, &target)?;
        Some(markdown_hover(text, None))
    }

    fn lua_hover(&self, document: &Document, position: Position) -> Option<Hover> {
        let line = document.line(position.line)?;

        if let Some(reference) = reference_at(line, position.character, ReferenceSyntax::Lua) {
            if let Some(text) = self.texts.read().find_text(&reference.page, &reference.text_id) {
                let range = document.line_span(position.line, reference.start, reference.end);
                return Some(plaintext_hover(&text, range));
            }
        }

        let lua = self.lua.read().clone();
        let (description, start, end) = lua.describe_at(line, position.character)?;
        let range = document.line_span(position.line, start, end);
        Some(markdown_hover(description.to_string(), range))
    }

    pub(crate) fn definition_at(&self, uri: &Url, position: Position) -> Option<Location> {
        if !self.is_ready() {
            return None;
        }
        let document = self.documents.get(uri.as_str())?;
        self.script_dialect(uri, &document)?;

        if let Some(variable) = self.variable_at(uri, position) {
            return variable.locations.first().cloned();
        }

        let line = document.line(position.line)?;
        let (start, end) = run_at(line, position.character, |ch| ch != '"')?;
        let token = &line[start..end];
        let schema = self.schema.read().clone();

        let mut candidate = token;
        loop {
            if let Some(location) = schema.locations.get(candidate) {
                debug!(token, matched = candidate, "schema definition");
                return Some(location.clone());
            }
            match candidate.split_once('.') {
                Some((_, rest)) if !rest.is_empty() => candidate = rest,
                _ => return None,
            }
        }
    }

    pub(crate) fn references_at(&self, uri: &Url, position: Position) -> Option<Vec<Location>> {
        if !self.is_ready() {
            return None;
        }
        let variable = self.variable_at(uri, position)?;
        Some(self.variables.locations(uri, variable.kind, &variable.name))
    }

    pub(crate) fn rename_at(
        &self,
        uri: &Url,
        position: Position,
        new_name: &str,
    ) -> Option<WorkspaceEdit> {
        if !self.is_ready() {
            return None;
        }
        let document = self.documents.get(uri.as_str())?;
        let variable = self.variable_at(uri, position)?;
        let bare = normalize(new_name);

        let mut changes: HashMap<Url, Vec<TextEdit>> = HashMap::new();
        for location in &variable.locations {
            let original = document.slice(location.range).unwrap_or_default();
            let new_text = if original.starts_with('$') {
                format!("${bare}")
            } else {
                bare.to_string()
            };
            changes
                .entry(location.uri.clone())
                .or_default()
                .push(TextEdit {
                    range: location.range,
                    new_text,
                });
        }

        if self.verbose() {
            debug!(old = %variable.name, new = bare, edits = variable.locations.len(), "rename");
        }
        self.variables.rename(variable.kind, &variable.name, bare, uri);

        Some(WorkspaceEdit {
            changes: Some(changes),
            ..WorkspaceEdit::default()
        })
    }
}

fn markdown_hover(value: String, range: Option<Range>) -> Hover {
    Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value,
        }),
        range,
    }
}

fn plaintext_hover(text: &str, range: Option<Range>) -> Hover {
    markdown_hover(format!("```plaintext\n{text}\n```"), range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GameData;
    use crate::language::LanguageTexts;
    use crate::lua::LuaIndex;
    use crate::scanner::VariableKind;
    use crate::schema::{parse_schema, SchemaIndex};
    use tower_lsp::LspService;

    const SCHEMA: &str = r#"<scriptproperties>
  <keyword name="player" description="The player">
    <property name="age" result="Time since game start" type="timer"/>
    <property name="entity" result="Player entity" type="entity"/>
  </keyword>
  <datatype name="entity" type="datatype">
    <property name="name" result="Name of the entity" type="string"/>
  </datatype>
</scriptproperties>
"#;

    const SCRIPT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<aiscript name="test.script">
  <params>
    <param name="$target"/>
  </params>
  <actions>
    <set_value name="$target" exact="player.age"/>
    <debug_text text="{1015,7}"/>
  </actions>
</aiscript>
"#;

    const LUA: &str = r#"local ffi = require("ffi")
local C = ffi.C
ffi.cdef[[
	bool IsGamePaused(void);
]]
local paused = C.IsGamePaused()
local label = ReadText(1015, 7)
"#;

    fn schema_uri() -> Url {
        Url::parse("file:///game/libraries/scriptproperties.xml").unwrap()
    }

    fn script_uri() -> Url {
        Url::parse("file:///mods/aiscripts/test.xml").unwrap()
    }

    fn with_backend(test: impl FnOnce(&Backend)) {
        let (service, _socket) = LspService::new(Backend::new);
        let backend = service.inner();

        let schema = SchemaIndex::build(parse_schema(SCHEMA), Some(&schema_uri()), SCHEMA, |_| {
            Ok(Vec::new())
        });
        let mut texts = LanguageTexts::new("44", false);
        texts.insert("1015", "7", "44", "Energy Cells");
        let mut lua = LuaIndex::default();
        lua.parse_source(LUA);
        backend.install(GameData { schema, texts, lua });

        test(backend);
    }

    fn open(backend: &Backend, uri: &Url, text: &str, language: DocumentLanguage) {
        backend.update_document(uri, text.to_string(), Some(language));
        backend.analyze_document(uri);
    }

    fn position_of(text: &str, needle: &str, skip: usize) -> Position {
        let offset = text
            .match_indices(needle)
            .nth(skip)
            .map(|(idx, _)| idx)
            .unwrap();
        Document::new(text.to_string(), DocumentLanguage::Xml).position_at(offset)
    }

    fn inside(mut position: Position, columns: u32) -> Position {
        position.character += columns;
        position
    }

    fn hover_text(hover: Hover) -> String {
        match hover.contents {
            HoverContents::Markup(markup) => markup.value,
            other => panic!("unexpected hover contents {other:?}"),
        }
    }

    #[test]
    fn param_names_are_plain_variables() {
        with_backend(|backend| {
            let uri = script_uri();
            open(backend, &uri, SCRIPT, DocumentLanguage::Xml);

            let at = inside(position_of(SCRIPT, "$target", 0), 2);
            let variable = backend.variable_at(&uri, at).unwrap();
            assert_eq!(variable.kind, VariableKind::Plain);
            assert_eq!(variable.name, "target");

            let hover = hover_text(backend.hover_at(&uri, at).unwrap());
            assert_eq!(hover, "AI Script _variable_: `target`");

            let references = backend.references_at(&uri, at).unwrap();
            assert_eq!(references.len(), 2);
            assert_eq!(backend.definition_at(&uri, at).unwrap(), references[0]);
        });
    }

    #[test]
    fn rename_keeps_sigil_and_moves_the_group() {
        with_backend(|backend| {
            let uri = script_uri();
            open(backend, &uri, SCRIPT, DocumentLanguage::Xml);
            let at = inside(position_of(SCRIPT, "$target", 1), 3);

            let edit = backend.rename_at(&uri, at, "$ship").unwrap();
            let changes = edit.changes.unwrap();
            let edits = &changes[&uri];
            assert_eq!(edits.len(), 2);
            assert!(edits.iter().all(|edit| edit.new_text == "$ship"));

            assert_eq!(backend.variable_at(&uri, at).unwrap().name, "ship");
            assert!(backend
                .variables
                .locations(&uri, VariableKind::Plain, "target")
                .is_empty());
        });
    }

    #[test]
    fn rescans_drop_removed_variables() {
        with_backend(|backend| {
            let uri = script_uri();
            open(backend, &uri, SCRIPT, DocumentLanguage::Xml);
            let at = inside(position_of(SCRIPT, "$target", 0), 1);
            assert!(backend.variable_at(&uri, at).is_some());

            let edited: String = SCRIPT
                .lines()
                .filter(|line| !line.contains("params>") && !line.contains("$target"))
                .map(|line| format!("{line}\n"))
                .collect();
            assert!(!edited.contains("target"));
            open(backend, &uri, &edited, DocumentLanguage::Xml);
            assert!(backend.variable_at(&uri, at).is_none());
            assert!(backend
                .variables
                .locations(&uri, VariableKind::Plain, "target")
                .is_empty());
        });
    }

    #[test]
    fn completes_keyword_properties() {
        with_backend(|backend| {
            let uri = script_uri();
            let text = "<aiscript>\n  <set_value name=\"$x\" exact=\"player.\"/>\n</aiscript>\n";
            open(backend, &uri, text, DocumentLanguage::Xml);

            let at = inside(position_of(text, "player.", 0), 7);
            let Some(CompletionResponse::List(list)) = backend.completion_at(&uri, at) else {
                panic!("expected a completion list");
            };
            assert!(list.is_incomplete);
            let labels: Vec<&str> = list.items.iter().map(|item| item.label.as_str()).collect();
            assert!(labels.contains(&"age"));
            assert!(labels.contains(&"entity.name"));
        });
    }

    #[test]
    fn non_script_documents_get_nothing() {
        with_backend(|backend| {
            let uri = Url::parse("file:///mods/t/0001-l044.xml").unwrap();
            let text = "<language id=\"44\">\n  <page id=\"1\"/>\n</language>\n";
            open(backend, &uri, text, DocumentLanguage::Xml);

            let at = Position::new(1, 4);
            assert!(backend.hover_at(&uri, at).is_none());
            assert!(backend.completion_at(&uri, at).is_none());
            assert!(!backend.dialects.contains_key(uri.as_str()));
        });
    }

    #[test]
    fn script_hover_prefers_text_references() {
        with_backend(|backend| {
            let uri = script_uri();
            open(backend, &uri, SCRIPT, DocumentLanguage::Xml);

            let at = inside(position_of(SCRIPT, "{1015,7}", 0), 2);
            let hover = backend.hover_at(&uri, at).unwrap();
            assert!(hover.range.is_some());
            assert_eq!(hover_text(hover), "```plaintext\n44: Energy Cells\n```");
        });
    }

    #[test]
    fn schema_hover_and_definition_follow_dotted_paths() {
        with_backend(|backend| {
            let uri = script_uri();
            open(backend, &uri, SCRIPT, DocumentLanguage::Xml);

            let at = inside(position_of(SCRIPT, "player.age", 0), 8);
            let hover = hover_text(backend.hover_at(&uri, at).unwrap());
            assert!(hover.contains("Keyword: player"));

            let location = backend.definition_at(&uri, at).unwrap();
            assert_eq!(location.uri, schema_uri());
            assert_eq!(location.range.start.line, 2);
        });
    }

    #[test]
    fn lua_documents_use_the_function_index() {
        with_backend(|backend| {
            let uri = Url::parse("file:///game/ui/menu.lua").unwrap();
            open(backend, &uri, LUA, DocumentLanguage::Lua);

            let Some(CompletionResponse::Array(items)) = backend.completion_at(&uri, Position::new(5, 0))
            else {
                panic!("expected Lua completions");
            };
            assert_eq!(items.len(), 1);

            let at = inside(position_of(LUA, "C.IsGamePaused()", 0), 4);
            assert!(hover_text(backend.hover_at(&uri, at).unwrap()).contains("`C.IsGamePaused`"));

            let at = inside(position_of(LUA, "ReadText", 0), 3);
            assert_eq!(
                hover_text(backend.hover_at(&uri, at).unwrap()),
                "```plaintext\n44: Energy Cells\n```"
            );
        });
    }

    #[test]
    fn requests_wait_for_configuration() {
        let (service, _socket) = LspService::new(Backend::new);
        let backend = service.inner();
        let uri = script_uri();
        open(backend, &uri, SCRIPT, DocumentLanguage::Xml);

        let at = inside(position_of(SCRIPT, "$target", 0), 2);
        assert!(backend.hover_at(&uri, at).is_none());
        assert!(backend.rename_at(&uri, at, "other").is_none());
    }
}
