use crate::scanner::{Dialect, VariableKind};
use crate::text::range_contains;
use dashmap::DashMap;
use indexmap::IndexMap;
use tower_lsp::lsp_types::{Location, Position, Url};

type NameGroups = IndexMap<String, Vec<Location>>;

/// Variables of one document, grouped by kind then by normalized name.
#[derive(Debug, Clone)]
pub struct DocumentVariables {
    dialect: Dialect,
    groups: IndexMap<VariableKind, NameGroups>,
}

impl DocumentVariables {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            groups: IndexMap::new(),
        }
    }

    pub fn record(&mut self, kind: VariableKind, name: &str, location: Location) {
        self.groups
            .entry(kind)
            .or_default()
            .entry(normalize(name).to_string())
            .or_default()
            .push(location);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(|names| names.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct VariableMatch {
    pub name: String,
    pub kind: VariableKind,
    pub dialect: Dialect,
    pub location: Location,
    pub locations: Vec<Location>,
}

#[derive(Debug, Default)]
pub struct VariableTracker {
    documents: DashMap<String, DocumentVariables>,
}

impl VariableTracker {
    /// Appends one occurrence; rescans build a whole table and `replace` it instead.
    #[cfg(test)]
    pub fn record(
        &self,
        kind: VariableKind,
        name: &str,
        dialect: Dialect,
        uri: &Url,
        range: tower_lsp::lsp_types::Range,
    ) {
        self.documents
            .entry(uri.to_string())
            .or_insert_with(|| DocumentVariables::new(dialect))
            .record(
                kind,
                name,
                Location {
                    uri: uri.clone(),
                    range,
                },
            );
    }

    /// Installs a freshly scanned table for `uri`, dropping whatever was there.
    pub fn replace(&self, uri: &Url, variables: DocumentVariables) {
        self.documents.insert(uri.to_string(), variables);
    }

    pub fn lookup_at(&self, uri: &Url, position: Position) -> Option<VariableMatch> {
        let document = self.documents.get(uri.as_str())?;
        for (kind, names) in &document.groups {
            for (name, locations) in names {
                if let Some(location) = locations
                    .iter()
                    .find(|location| range_contains(&location.range, position))
                {
                    return Some(VariableMatch {
                        name: name.clone(),
                        kind: *kind,
                        dialect: document.dialect,
                        location: location.clone(),
                        locations: locations.clone(),
                    });
                }
            }
        }
        None
    }

    pub fn locations(&self, uri: &Url, kind: VariableKind, name: &str) -> Vec<Location> {
        self.documents
            .get(uri.as_str())
            .and_then(|document| {
                document
                    .groups
                    .get(&kind)
                    .and_then(|names| names.get(normalize(name)).cloned())
            })
            .unwrap_or_default()
    }

    pub fn rename(&self, kind: VariableKind, old_name: &str, new_name: &str, uri: &Url) {
        let Some(mut document) = self.documents.get_mut(uri.as_str()) else {
            return;
        };
        let Some(names) = document.groups.get_mut(&kind) else {
            return;
        };
        let Some(locations) = names.shift_remove(normalize(old_name)) else {
            return;
        };
        names.insert(normalize(new_name).to_string(), locations);
    }

    pub fn clear(&self, uri: &Url) {
        self.documents.remove(uri.as_str());
    }
}

/// Strips one leading sigil.
pub fn normalize(name: &str) -> &str {
    name.strip_prefix('$')
        .or_else(|| name.strip_prefix('@'))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Range;

    fn uri() -> Url {
        Url::parse("file:///scripts/order.test.xml").unwrap()
    }

    fn range(line: u32, start: u32, end: u32) -> Range {
        Range {
            start: Position {
                line,
                character: start,
            },
            end: Position {
                line,
                character: end,
            },
        }
    }

    #[test]
    fn normalizes_sigils_and_groups_occurrences() {
        let tracker = VariableTracker::default();
        tracker.record(VariableKind::Plain, "$ship", Dialect::AiScript, &uri(), range(1, 4, 9));
        tracker.record(VariableKind::Plain, "ship", Dialect::AiScript, &uri(), range(3, 10, 15));

        let found = tracker
            .lookup_at(&uri(), Position { line: 3, character: 12 })
            .unwrap();
        assert_eq!(found.name, "ship");
        assert_eq!(found.kind, VariableKind::Plain);
        assert_eq!(found.dialect, Dialect::AiScript);
        assert_eq!(found.locations.len(), 2);
        assert_eq!(found.location.range, range(3, 10, 15));
    }

    #[test]
    fn kinds_do_not_share_names() {
        let tracker = VariableTracker::default();
        tracker.record(VariableKind::Plain, "$x", Dialect::MdScript, &uri(), range(0, 0, 2));
        tracker.record(VariableKind::TableField, "$x", Dialect::MdScript, &uri(), range(1, 0, 2));

        assert_eq!(tracker.locations(&uri(), VariableKind::Plain, "x").len(), 1);
        let field = tracker
            .lookup_at(&uri(), Position { line: 1, character: 1 })
            .unwrap();
        assert_eq!(field.kind, VariableKind::TableField);
        assert_eq!(field.locations.len(), 1);
    }

    #[test]
    fn rename_moves_locations_to_new_name() {
        let tracker = VariableTracker::default();
        tracker.record(VariableKind::Plain, "$x", Dialect::AiScript, &uri(), range(0, 0, 2));
        tracker.record(VariableKind::Plain, "$x", Dialect::AiScript, &uri(), range(2, 5, 7));
        tracker.record(VariableKind::Plain, "$y", Dialect::AiScript, &uri(), range(4, 0, 2));

        tracker.rename(VariableKind::Plain, "x", "y", &uri());

        for position in [Position { line: 0, character: 1 }, Position { line: 2, character: 6 }] {
            let found = tracker.lookup_at(&uri(), position).unwrap();
            assert_eq!(found.name, "y");
            assert_eq!(found.locations.len(), 2);
        }
        assert!(tracker.locations(&uri(), VariableKind::Plain, "x").is_empty());
        // the previous `y` list is overwritten, not merged
        assert!(tracker
            .lookup_at(&uri(), Position { line: 4, character: 1 })
            .is_none());
    }

    #[test]
    fn rename_of_unknown_name_is_a_no_op() {
        let tracker = VariableTracker::default();
        tracker.record(VariableKind::Plain, "$x", Dialect::AiScript, &uri(), range(0, 0, 2));
        tracker.rename(VariableKind::Plain, "missing", "y", &uri());
        tracker.rename(VariableKind::TableField, "x", "y", &uri());
        assert_eq!(tracker.locations(&uri(), VariableKind::Plain, "x").len(), 1);
    }

    #[test]
    fn replace_drops_stale_ranges() {
        let tracker = VariableTracker::default();
        tracker.record(VariableKind::Plain, "$v", Dialect::AiScript, &uri(), range(5, 2, 4));

        let mut rescanned = DocumentVariables::new(Dialect::AiScript);
        rescanned.record(
            VariableKind::Plain,
            "$other",
            Location {
                uri: uri(),
                range: range(1, 0, 6),
            },
        );
        tracker.replace(&uri(), rescanned);

        assert!(tracker
            .lookup_at(&uri(), Position { line: 5, character: 3 })
            .is_none());
        assert!(tracker
            .lookup_at(&uri(), Position { line: 1, character: 3 })
            .is_some());

        tracker.clear(&uri());
        assert!(tracker
            .lookup_at(&uri(), Position { line: 1, character: 3 })
            .is_none());
    }
}
