//! Keyword/datatype schema (`libraries/scriptproperties.xml`).

use crate::error::{read_file, Error, Result};
use crate::registry::TypeRegistry;
use crate::text::{Document, DocumentLanguage};
use crate::xml::{escape_angles, OpenTag, ScanEvent, TagScanner};
use std::collections::HashMap;
use std::path::Path;
use tower_lsp::lsp_types::{Location, Range, Url};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptProperty {
    pub name: String,
    pub result: Option<String>,
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordImport {
    pub source: String,
    pub select: String,
    /// Attribute to read on each selected element, usually written `@id`.
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyword {
    pub name: String,
    pub type_name: Option<String>,
    pub pseudo: Option<String>,
    pub description: Option<String>,
    pub result: Option<String>,
    pub suffix: Option<String>,
    pub properties: Vec<ScriptProperty>,
    pub import: Option<KeywordImport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datatype {
    pub name: String,
    pub type_name: Option<String>,
    pub suffix: Option<String>,
    pub properties: Vec<ScriptProperty>,
}

/// Borrowed view over either kind of schema entry.
#[derive(Debug, Clone, Copy)]
pub enum SchemaEntry<'a> {
    Keyword(&'a Keyword),
    Datatype(&'a Datatype),
}

impl<'a> SchemaEntry<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            SchemaEntry::Keyword(keyword) => &keyword.name,
            SchemaEntry::Datatype(datatype) => &datatype.name,
        }
    }

    pub fn properties(&self) -> &'a [ScriptProperty] {
        match self {
            SchemaEntry::Keyword(keyword) => &keyword.properties,
            SchemaEntry::Datatype(datatype) => &datatype.properties,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub keywords: Vec<Keyword>,
    pub datatypes: Vec<Datatype>,
    keyword_index: HashMap<String, usize>,
    datatype_index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(keywords: Vec<Keyword>, datatypes: Vec<Datatype>) -> Self {
        let mut keyword_index = HashMap::new();
        for (idx, keyword) in keywords.iter().enumerate() {
            keyword_index.entry(keyword.name.clone()).or_insert(idx);
        }
        let mut datatype_index = HashMap::new();
        for (idx, datatype) in datatypes.iter().enumerate() {
            datatype_index.entry(datatype.name.clone()).or_insert(idx);
        }
        Self {
            keywords,
            datatypes,
            keyword_index,
            datatype_index,
        }
    }

    pub fn keyword(&self, name: &str) -> Option<&Keyword> {
        self.keyword_index.get(name).map(|idx| &self.keywords[*idx])
    }

    pub fn datatype(&self, name: &str) -> Option<&Datatype> {
        self.datatype_index.get(name).map(|idx| &self.datatypes[*idx])
    }

    /// Entry a path may start from: a keyword without an import, else a datatype.
    pub fn entry(&self, name: &str) -> Option<SchemaEntry<'_>> {
        match self.keyword(name) {
            Some(keyword) if keyword.import.is_none() => Some(SchemaEntry::Keyword(keyword)),
            _ => self.datatype(name).map(SchemaEntry::Datatype),
        }
    }
}

/// Everything derived from one schema load; replaced wholesale on reload.
#[derive(Debug, Default)]
pub struct SchemaIndex {
    pub schema: Schema,
    pub registry: TypeRegistry,
    pub locations: HashMap<String, Location>,
}

impl SchemaIndex {
    /// Reads the schema and any import sources below `libraries`.
    pub fn load(path: &Path, libraries: &Path) -> Result<Self> {
        info!("reading {}", path.display());
        let text = read_file(path)?;
        let uri = Url::from_file_path(path).ok();
        let parsed = parse_schema(&text);
        let index = Self::build(parsed, uri.as_ref(), &text, |import| {
            let source = libraries.join(&import.source);
            load_import_literals(&source, &import.select, &import.target)
        });
        info!(
            keywords = index.schema.keywords.len(),
            datatypes = index.schema.datatypes.len(),
            types = index.registry.len(),
            "parsed schema"
        );
        Ok(index)
    }

    pub fn build(
        parsed: ParsedSchema,
        uri: Option<&Url>,
        text: &str,
        mut import_literals: impl FnMut(&KeywordImport) -> Result<Vec<String>>,
    ) -> Self {
        let ParsedSchema {
            keywords,
            datatypes,
            spans,
        } = parsed;
        let mut registry = TypeRegistry::default();

        for keyword in &keywords {
            let key = escape_angles(&keyword.name);
            if let Some(import) = &keyword.import {
                match import_literals(import) {
                    Ok(literals) => {
                        for literal in literals {
                            registry.declare_literal(&key, &escape_angles(&literal));
                        }
                    }
                    Err(err) => warn!("import for keyword {} failed: {err}", keyword.name),
                }
            } else {
                for property in &keyword.properties {
                    registry.declare_property(&key, &property.name, property.type_name.as_deref());
                }
            }
        }

        for datatype in &datatypes {
            if datatype.properties.is_empty() {
                continue;
            }
            let key = escape_angles(&datatype.name);
            registry.declare_type(&key, datatype.type_name.as_deref());
            for property in &datatype.properties {
                registry.declare_property(&key, &property.name, property.type_name.as_deref());
            }
        }

        registry.declare_literal("boolean", "==true");
        registry.declare_literal("boolean", "==false");

        let mut locations = HashMap::new();
        if let Some(uri) = uri {
            let document = Document::new(text.to_string(), DocumentLanguage::Xml);
            for (key, (start, end)) in spans {
                let range: Range = document.range_of(start, end);
                locations.insert(
                    escape_angles(&key),
                    Location {
                        uri: uri.clone(),
                        range,
                    },
                );
            }
        }

        Self {
            schema: Schema::new(keywords, datatypes),
            registry,
            locations,
        }
    }
}

#[derive(Debug, Default)]
pub struct ParsedSchema {
    pub keywords: Vec<Keyword>,
    pub datatypes: Vec<Datatype>,
    /// Definition key (`name` or `owner.property`, decoded) -> open tag byte span.
    pub spans: Vec<(String, (usize, usize))>,
}

enum Current {
    Keyword(Keyword),
    Datatype(Datatype),
}

impl Current {
    fn name(&self) -> &str {
        match self {
            Current::Keyword(keyword) => &keyword.name,
            Current::Datatype(datatype) => &datatype.name,
        }
    }
}

/// Collects keywords and datatypes; entries without a name are skipped.
pub fn parse_schema(text: &str) -> ParsedSchema {
    let mut parsed = ParsedSchema::default();
    let mut current: Option<Current> = None;
    let mut in_import = false;

    for event in TagScanner::new(text) {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!("error parsing schema: {err}");
                continue;
            }
        };
        match event {
            ScanEvent::Open(tag) => match tag.name {
                "keyword" | "datatype" => {
                    let Some(name) = tag.decoded("name") else {
                        warn!("skipping {} without a name at byte {}", tag.name, tag.start);
                        current = None;
                        continue;
                    };
                    parsed.spans.push((name.clone(), (tag.start, tag.end)));
                    current = Some(if tag.name == "keyword" {
                        Current::Keyword(Keyword {
                            name,
                            type_name: tag.decoded("type"),
                            pseudo: tag.decoded("pseudo"),
                            description: tag.decoded("description"),
                            result: tag.decoded("result"),
                            suffix: tag.decoded("suffix"),
                            ..Keyword::default()
                        })
                    } else {
                        Current::Datatype(Datatype {
                            name,
                            type_name: tag.decoded("type"),
                            suffix: tag.decoded("suffix"),
                            ..Datatype::default()
                        })
                    });
                }
                "import" => {
                    if let Some(Current::Keyword(keyword)) = current.as_mut() {
                        in_import = true;
                        keyword.import = Some(KeywordImport {
                            source: tag.decoded("source").unwrap_or_default(),
                            select: tag.decoded("select").unwrap_or_default(),
                            target: String::new(),
                        });
                    }
                }
                "property" => handle_property(&tag, current.as_mut(), in_import, &mut parsed),
                _ => {}
            },
            ScanEvent::Close(name) => match name {
                "keyword" | "datatype" => match current.take() {
                    Some(Current::Keyword(keyword)) => parsed.keywords.push(keyword),
                    Some(Current::Datatype(datatype)) => parsed.datatypes.push(datatype),
                    None => {}
                },
                "import" => in_import = false,
                _ => {}
            },
            ScanEvent::Text(_) => {}
        }
    }

    debug!(
        keywords = parsed.keywords.len(),
        datatypes = parsed.datatypes.len(),
        "collected schema entries"
    );
    parsed
}

fn handle_property(
    tag: &OpenTag<'_>,
    current: Option<&mut Current>,
    in_import: bool,
    parsed: &mut ParsedSchema,
) {
    let Some(current) = current else {
        return;
    };
    let Some(name) = tag.decoded("name") else {
        warn!("skipping property without a name in {}", current.name());
        return;
    };

    if in_import {
        if let Current::Keyword(Keyword {
            import: Some(import),
            ..
        }) = current
        {
            import.target = name;
        }
        return;
    }

    parsed
        .spans
        .push((format!("{}.{}", current.name(), name), (tag.start, tag.end)));
    let property = ScriptProperty {
        name,
        result: tag.decoded("result"),
        type_name: tag.decoded("type"),
    };
    match current {
        Current::Keyword(keyword) => keyword.properties.push(property),
        Current::Datatype(datatype) => datatype.properties.push(property),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectorStep {
    descendant: bool,
    name: Option<String>,
    predicate: Option<(String, Option<String>)>,
}

/// Path selector of the form `/a/b`, `//b[@attr='v']/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    steps: Vec<SelectorStep>,
}

impl Selector {
    pub fn parse(expression: &str) -> Option<Self> {
        let mut steps = Vec::new();
        let mut rest = expression.trim();
        if rest.is_empty() {
            return None;
        }

        while !rest.is_empty() {
            let descendant = if let Some(stripped) = rest.strip_prefix("//") {
                rest = stripped;
                true
            } else if let Some(stripped) = rest.strip_prefix('/') {
                rest = stripped;
                false
            } else {
                // relative paths match anywhere
                steps.is_empty()
            };

            let end = step_end(rest);
            let (step, tail) = rest.split_at(end);
            rest = tail;
            steps.push(parse_step(step, descendant)?);
        }

        Some(Self { steps })
    }

    /// Whether the element at the top of `stack` is selected.
    pub fn matches(&self, stack: &[(String, HashMap<String, String>)]) -> bool {
        fn matches_from(steps: &[SelectorStep], stack: &[(String, HashMap<String, String>)]) -> bool {
            let Some((step, earlier_steps)) = steps.split_last() else {
                return stack.is_empty();
            };
            let Some(((name, attributes), ancestors)) = stack.split_last() else {
                return false;
            };
            if !step.accepts(name, attributes) {
                return false;
            }
            if step.descendant {
                (0..=ancestors.len()).any(|len| matches_from(earlier_steps, &ancestors[..len]))
            } else {
                matches_from(earlier_steps, ancestors)
            }
        }

        matches_from(&self.steps, stack)
    }
}

impl SelectorStep {
    fn accepts(&self, name: &str, attributes: &HashMap<String, String>) -> bool {
        if let Some(expected) = &self.name {
            if expected != name {
                return false;
            }
        }
        match &self.predicate {
            Some((attr, Some(value))) => attributes.get(attr) == Some(value),
            Some((attr, None)) => attributes.contains_key(attr),
            None => true,
        }
    }
}

fn step_end(rest: &str) -> usize {
    let mut in_brackets = false;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            '/' if !in_brackets => return idx,
            _ => {}
        }
    }
    rest.len()
}

fn parse_step(step: &str, descendant: bool) -> Option<SelectorStep> {
    let (name, predicate) = match step.find('[') {
        Some(open) => {
            let inner = step[open + 1..].strip_suffix(']')?;
            let inner = inner.strip_prefix('@')?;
            let predicate = match inner.split_once('=') {
                Some((attr, value)) => (
                    attr.trim().to_string(),
                    Some(value.trim().trim_matches(|ch| ch == '\'' || ch == '"').to_string()),
                ),
                None => (inner.trim().to_string(), None),
            };
            (&step[..open], Some(predicate))
        }
        None => (step, None),
    };

    if name.is_empty() {
        return None;
    }
    Some(SelectorStep {
        descendant,
        name: (name != "*").then(|| name.to_string()),
        predicate,
    })
}

/// Values of `target` on every element of `text` selected by `select`.
pub fn select_attribute_values(
    text: &str,
    select: &Selector,
    target: &str,
) -> std::result::Result<Vec<String>, xmlparser::Error> {
    let attribute = target.strip_prefix('@').unwrap_or(target);
    let mut stack: Vec<(String, HashMap<String, String>)> = Vec::new();
    let mut values = Vec::new();

    for event in TagScanner::new(text) {
        match event? {
            ScanEvent::Open(tag) => {
                let attributes = tag
                    .attributes
                    .iter()
                    .map(|attr| (attr.name.to_string(), attr.decoded().into_owned()))
                    .collect();
                stack.push((tag.name.to_string(), attributes));
                if select.matches(&stack) {
                    if let Some(value) = stack.last().and_then(|(_, attrs)| attrs.get(attribute)) {
                        values.push(value.clone());
                    }
                }
            }
            ScanEvent::Close(_) => {
                stack.pop();
            }
            ScanEvent::Text(_) => {}
        }
    }

    Ok(values)
}

pub fn load_import_literals(path: &Path, select: &str, target: &str) -> Result<Vec<String>> {
    info!("importing literals from {}", path.display());
    let text = read_file(path)?;
    let Some(selector) = Selector::parse(select) else {
        warn!("unsupported import selector {select:?}");
        return Ok(Vec::new());
    };
    select_attribute_values(&text, &selector, target).map_err(|source| Error::Xml {
        path: path.to_path_buf(),
        source,
    })
}
