use crate::xml::{OpenTag, ScanEvent, TagScanner};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{trace, warn};

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([a-zA-Z_][a-zA-Z0-9_]*)").expect("valid variable pattern"));
static TABLE_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"table\[").expect("valid table key pattern"));

/// Root element kind of a script document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    AiScript,
    MdScript,
}

impl Dialect {
    pub fn from_root(name: &str) -> Option<Self> {
        match name {
            "aiscript" => Some(Dialect::AiScript),
            "mdscript" => Some(Dialect::MdScript),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Dialect::AiScript => "AI Script",
            Dialect::MdScript => "Mission Director Script",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Plain,
    TableField,
}

impl VariableKind {
    pub fn label(self) -> &'static str {
        match self {
            VariableKind::Plain => "_variable_",
            VariableKind::TableField => "_remote variable_ or _table field_",
        }
    }
}

/// A variable reference found in attribute text, in byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOccurrence {
    pub kind: VariableKind,
    pub name: String,
    pub start: usize,
    pub end: usize,
}

/// Looks only at the first opened element.
pub fn detect_dialect(text: &str) -> Option<Dialect> {
    for event in TagScanner::new(text) {
        match event {
            Ok(ScanEvent::Open(tag)) => return Dialect::from_root(tag.name),
            Ok(_) => continue,
            Err(err) => {
                trace!("stopped dialect detection: {err}");
                return None;
            }
        }
    }
    None
}

pub fn extract_variables(text: &str) -> Vec<RawOccurrence> {
    let mut occurrences = Vec::new();
    let mut stack: Vec<&str> = Vec::new();

    for event in TagScanner::new(text) {
        match event {
            Ok(ScanEvent::Open(tag)) => {
                let parent = stack.last().copied();
                collect_from_tag(text, &tag, parent, &mut occurrences);
                stack.push(tag.name);
            }
            Ok(ScanEvent::Close(name)) => {
                // unmatched closes are ignored; a match also drops unclosed children
                if let Some(depth) = stack.iter().rposition(|open| *open == name) {
                    stack.truncate(depth);
                }
            }
            Ok(ScanEvent::Text(_)) => {}
            Err(err) => warn!("error parsing XML document: {err}"),
        }
    }

    occurrences
}

fn collect_from_tag(
    text: &str,
    tag: &OpenTag<'_>,
    parent: Option<&str>,
    occurrences: &mut Vec<RawOccurrence>,
) {
    for attr in &tag.attributes {
        if tag.name == "param" && parent == Some("params") && attr.name == "name" {
            occurrences.push(RawOccurrence {
                kind: VariableKind::Plain,
                name: attr.value.to_string(),
                start: attr.value_start,
                end: attr.value_start + attr.value.len(),
            });
            continue;
        }

        let table_mode = TABLE_KEY_PATTERN.is_match(attr.value);
        for captures in VARIABLE_PATTERN.captures_iter(attr.value) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let start = attr.value_start + whole.start();
            let preceding = text[..start].chars().next_back();

            if let Some(kind) = classify(text, attr.value_start, start, preceding, table_mode) {
                occurrences.push(RawOccurrence {
                    kind,
                    name: name.as_str().to_string(),
                    start,
                    end: attr.value_start + whole.end(),
                });
            }
        }
    }
}

/// Decides whether a `$name` match at `start` is a variable and of which kind.
fn classify(
    text: &str,
    value_start: usize,
    start: usize,
    preceding: Option<char>,
    table_mode: bool,
) -> Option<VariableKind> {
    let at_document_start = start == 0;
    let accepted = at_document_start
        || (!table_mode
            && matches!(preceding, Some(',' | '"' | '[' | '{' | '@' | ' ' | '.')))
        || (table_mode && matches!(preceding, Some(',' | ' ' | '[')));
    if !accepted {
        return None;
    }

    let assigned = table_mode && equals_precedes(&text[value_start..start]);
    if at_document_start || (preceding != Some('.') && (!table_mode || assigned)) {
        Some(VariableKind::Plain)
    } else {
        Some(VariableKind::TableField)
    }
}

/// True when an `=` occurs with no `%` or `,` between it and the end.
fn equals_precedes(preceding: &str) -> bool {
    match preceding.rfind('=') {
        Some(idx) => !preceding[idx + 1..].contains(['%', ',']),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<(VariableKind, String)> {
        extract_variables(text)
            .into_iter()
            .map(|occ| (occ.kind, occ.name))
            .collect()
    }

    #[test]
    fn detects_dialect_from_root_element() {
        let ai = "<?xml version=\"1.0\"?>\n<aiscript name=\"order.test\"><order/></aiscript>";
        assert_eq!(detect_dialect(ai), Some(Dialect::AiScript));
        let md = "<!-- header -->\n<mdscript name=\"Test\"></mdscript>";
        assert_eq!(detect_dialect(md), Some(Dialect::MdScript));
        assert_eq!(detect_dialect("<language id=\"44\"></language>"), None);
        assert_eq!(detect_dialect("not xml at all"), None);
    }

    #[test]
    fn detection_ignores_nested_script_elements() {
        let text = "<diff><add><aiscript/></add></diff>";
        assert_eq!(detect_dialect(text), None);
    }

    #[test]
    fn variable_at_attribute_start_is_plain() {
        let text = r#"<aiscript><set_value name="$foo"/></aiscript>"#;
        assert_eq!(kinds(text), vec![(VariableKind::Plain, "foo".to_string())]);
    }

    #[test]
    fn table_lookup_without_assignment_is_table_field() {
        let text = r#"<aiscript><set_value name="$t" exact="table[$foo]"/></aiscript>"#;
        assert_eq!(
            kinds(text),
            vec![
                (VariableKind::Plain, "t".to_string()),
                (VariableKind::TableField, "foo".to_string()),
            ]
        );
    }

    #[test]
    fn assignment_inside_table_is_plain() {
        let text = r#"<aiscript><set_value name="$t" exact="table[$key = $foo]"/></aiscript>"#;
        assert_eq!(
            kinds(text),
            vec![
                (VariableKind::Plain, "t".to_string()),
                (VariableKind::TableField, "key".to_string()),
                (VariableKind::Plain, "foo".to_string()),
            ]
        );
    }

    #[test]
    fn comma_after_equals_keeps_table_field() {
        let text = r#"<a v="table[$a = 1, $b = 2]"/>"#;
        assert_eq!(
            kinds(text),
            vec![
                (VariableKind::TableField, "a".to_string()),
                (VariableKind::TableField, "b".to_string()),
            ]
        );
    }

    #[test]
    fn property_access_chain_is_remote_variable() {
        let text = r#"<a v="$ship.$owner"/>"#;
        assert_eq!(
            kinds(text),
            vec![
                (VariableKind::Plain, "ship".to_string()),
                (VariableKind::TableField, "owner".to_string()),
            ]
        );
    }

    #[test]
    fn skips_matches_with_unexpected_prefix() {
        let text = r#"<a v="not$this (also$not) [$yes]"/>"#;
        assert_eq!(kinds(text), vec![(VariableKind::Plain, "yes".to_string())]);
    }

    #[test]
    fn param_declaration_spans_whole_value() {
        let text = "<action>\n  <params>\n    <param name=\"$target\"/>\n  </params>\n</action>";
        let occurrences = extract_variables(text);
        assert_eq!(occurrences.len(), 1);
        let occ = &occurrences[0];
        assert_eq!(occ.kind, VariableKind::Plain);
        assert_eq!(occ.name, "$target");
        assert_eq!(&text[occ.start..occ.end], "$target");
    }

    #[test]
    fn param_outside_params_is_scanned_as_text() {
        let text = r#"<cue><param name="plain_name" value="$v"/></cue>"#;
        assert_eq!(kinds(text), vec![(VariableKind::Plain, "v".to_string())]);
    }

    #[test]
    fn keeps_scanning_after_markup_error() {
        let text = "<aiscript>\n<a x=\"$one\" broken></a>\n<b y=\"$two\"/>\n</aiscript>";
        let names: Vec<_> = kinds(text).into_iter().map(|(_, name)| name).collect();
        assert_eq!(names, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn half_typed_param_keeps_siblings_under_params() {
        let text = r#"<aiscript><params><param name="a" broken></param><param name="target"/></params></aiscript>"#;
        assert_eq!(
            kinds(text),
            vec![
                (VariableKind::Plain, "a".to_string()),
                (VariableKind::Plain, "target".to_string()),
            ]
        );
    }

    #[test]
    fn stray_close_tags_do_not_unwind_the_stack() {
        let text = r#"<aiscript><params></oops><param name="$x"/></params></aiscript>"#;
        assert_eq!(kinds(text), vec![(VariableKind::Plain, "$x".to_string())]);
    }
}
