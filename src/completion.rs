use crate::registry::{Candidates, TypeRegistry};
use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind};
use tracing::debug;

/// The two dotted/quoted tokens left of the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathContext {
    pub previous: String,
    pub current: String,
}

/// Splits the line text before the cursor into `previous.current`.
///
/// The right delimiter is the last `.`, or the last `"` that is not the
/// final character. Returns `None` when neither exists.
pub fn locate_path_context(text: &str) -> Option<PathContext> {
    let last_char_start = text.char_indices().next_back().map_or(0, |(idx, _)| idx);
    let dot = text.rfind('.');
    let quote = text[..last_char_start].rfind('"');
    let pos = dot.max(quote)?;

    let mut current = &text[pos + 1..];
    if let Some(stripped) = current.strip_suffix('"') {
        current = stripped;
    }

    let before = &text[..pos];
    let previous_pos = before.rfind('.').max(before.rfind('"'));
    let previous = match previous_pos {
        Some(start) => &before[start + 1..],
        // a long dangling fragment with nothing before it
        None if text[pos..].chars().count() > 3 => "",
        None => before,
    };

    Some(PathContext {
        previous: previous.to_string(),
        current: current.to_string(),
    })
}

/// Completion candidates for `context`, in registration order.
pub fn resolve(registry: &TypeRegistry, context: &PathContext, verbose: bool) -> Candidates {
    let mut candidates = Candidates::new();
    let PathContext { previous, current } = context;

    if !previous.is_empty() && !previous.starts_with('{') {
        match registry.get(previous) {
            Some(entry) => {
                if verbose {
                    debug!(previous, "matching on type");
                }
                for (property, property_type) in &entry.properties {
                    registry.expand_property("", previous, property, property_type, &mut candidates, 0);
                }
            }
            None => {
                if verbose {
                    debug!(previous, "previous token is not a known type");
                }
            }
        }
        return candidates;
    }

    if previous.is_empty() && current.chars().count() < 2 {
        if verbose {
            debug!(current, "ignoring short token without context");
        }
        return candidates;
    }

    if let Some(type_name) = previous.strip_prefix('{') {
        match registry.get(type_name) {
            Some(entry) => {
                for literal in &entry.literals {
                    let label = format!("{literal}}}");
                    if !candidates.contains_key(&label) {
                        candidates.insert(label.clone(), label);
                    }
                }
            }
            None => {
                if verbose {
                    debug!(type_name, "bracketed type not found");
                }
            }
        }
    }

    if verbose {
        debug!(current, "falling back to type name prefix match");
    }
    for name in registry.names() {
        if name.starts_with(current.as_str()) {
            registry.expand_type("", name, &mut candidates, 0);
        }
    }
    candidates
}

pub fn to_completion_items(candidates: Candidates) -> Vec<CompletionItem> {
    candidates
        .into_iter()
        .map(|(label, detail)| CompletionItem {
            label,
            kind: Some(CompletionItemKind::PROPERTY),
            detail: Some(detail),
            ..CompletionItem::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BASE_TYPE;

    fn context(previous: &str, current: &str) -> Option<PathContext> {
        Some(PathContext {
            previous: previous.to_string(),
            current: current.to_string(),
        })
    }

    fn ship_registry() -> TypeRegistry {
        let mut registry = TypeRegistry::default();
        registry.declare_type("Ship", Some(BASE_TYPE));
        registry.declare_property("Ship", "name", Some("string"));
        registry.declare_property("Ship", "cargo", Some("Container"));
        registry.declare_type("Container", Some(BASE_TYPE));
        registry.declare_property("Container", "amount", Some("int"));
        registry.declare_literal("class", "ship_s");
        registry.declare_literal("class", "station");
        registry
    }

    #[test]
    fn tokenizes_dotted_paths() {
        assert_eq!(locate_path_context(r#"<set exact="Ship."#), context("Ship", ""));
        assert_eq!(locate_path_context(r#"<set exact="Ship.ca"#), context("Ship", "ca"));
        assert_eq!(locate_path_context(r#"exact="$a.b.c"#), context("b", "c"));
        assert_eq!(locate_path_context("no delimiters"), None);
    }

    #[test]
    fn ignores_a_quote_in_final_position() {
        // the trailing quote is the one the editor auto-closed
        assert_eq!(locate_path_context(r#"x="Ship.ca""#), context("Ship", "ca"));
        assert_eq!(locate_path_context("\""), None);
    }

    #[test]
    fn long_dangling_fragment_has_empty_previous() {
        assert_eq!(locate_path_context("\"player"), context("", "player"));
        assert_eq!(locate_path_context("a\"pl"), context("a", "pl"));
    }

    #[test]
    fn completes_ship_path() {
        let registry = ship_registry();
        let candidates = resolve(&registry, &context("Ship", "").unwrap(), false);
        let labels: Vec<_> = candidates.keys().map(String::as_str).collect();
        assert_eq!(labels, vec!["name", "cargo", "Container", "cargo.amount"]);
        assert_eq!(candidates["cargo.amount"], "Container.amount");
    }

    #[test]
    fn unknown_previous_token_yields_nothing() {
        let registry = ship_registry();
        assert!(resolve(&registry, &context(" exact=", "pl").unwrap(), false).is_empty());
    }

    #[test]
    fn short_fragment_without_context_yields_nothing() {
        let registry = ship_registry();
        assert!(resolve(&registry, &context("", "S").unwrap(), false).is_empty());
    }

    #[test]
    fn bracketed_type_offers_literals() {
        let registry = ship_registry();
        let candidates = resolve(&registry, &context("{class", "").unwrap(), false);
        assert!(candidates.contains_key("ship_s}"));
        assert!(candidates.contains_key("station}"));
    }

    #[test]
    fn falls_back_to_type_name_prefix() {
        let registry = ship_registry();
        let candidates = resolve(&registry, &context("", "Sh").unwrap(), false);
        assert!(candidates.contains_key("name"));
        assert!(candidates.contains_key("cargo"));
        assert!(!candidates.contains_key("amount"));
    }

    #[test]
    fn items_carry_detail() {
        let registry = ship_registry();
        let items = to_completion_items(resolve(&registry, &context("Ship", "").unwrap(), false));
        assert_eq!(items[0].label, "name");
        assert_eq!(items[0].detail.as_deref(), Some("Ship.name"));
    }
}
