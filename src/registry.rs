use crate::xml::escape_angles;
use indexmap::{IndexMap, IndexSet};
use tracing::trace;

/// Supertype value that marks the generic base type.
pub const BASE_TYPE: &str = "datatype";

/// Hard cap on candidates produced by one expansion.
pub const MAX_CANDIDATES: usize = 1000;

/// Depth past which expansion stops.
const MAX_DEPTH: i32 = 1;

const PRIMITIVES: [&str; 6] = ["", "boolean", "int", "string", "list", "datatype"];

pub fn is_primitive(name: &str) -> bool {
    PRIMITIVES.contains(&name)
}

#[derive(Debug, Clone, Default)]
pub struct TypeEntry {
    pub properties: IndexMap<String, String>,
    pub supertype: Option<String>,
    pub literals: IndexSet<String>,
}

/// Completion label -> detail text, in insertion order.
pub type Candidates = IndexMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<String, TypeEntry>,
}

impl TypeRegistry {
    fn entry_mut(&mut self, name: &str) -> &mut TypeEntry {
        self.types.entry(name.to_string()).or_default()
    }

    pub fn declare_type(&mut self, name: &str, supertype: Option<&str>) {
        let entry = self.entry_mut(name);
        if let Some(supertype) = supertype.filter(|supertype| *supertype != BASE_TYPE) {
            entry.supertype = Some(supertype.to_string());
        }
    }

    pub fn declare_literal(&mut self, name: &str, literal: &str) {
        self.entry_mut(name).literals.insert(literal.to_string());
    }

    pub fn declare_property(&mut self, name: &str, property: &str, property_type: Option<&str>) {
        self.entry_mut(name)
            .properties
            .insert(property.to_string(), property_type.unwrap_or_default().to_string());
    }

    pub fn get(&self, name: &str) -> Option<&TypeEntry> {
        self.types.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Expands `type_name` into dotted completion labels below `prefix`.
    pub fn expand_type(&self, prefix: &str, type_name: &str, candidates: &mut Candidates, depth: i32) {
        if is_primitive(type_name) {
            return;
        }
        let Some(entry) = self.types.get(type_name) else {
            return;
        };
        if depth > MAX_DEPTH {
            trace!(type_name, depth, "max depth reached");
            return;
        }

        if depth > -1 && !prefix.is_empty() {
            add_candidate(candidates, type_name, None);
        }

        if candidates.len() >= MAX_CANDIDATES {
            trace!(type_name, "max candidate count reached");
            return;
        }

        for (property, property_type) in &entry.properties {
            self.expand_property(prefix, type_name, property, property_type, candidates, depth + 1);
        }

        if let Some(supertype) = entry.supertype.as_deref() {
            trace!(type_name, supertype, "recursing on supertype");
            self.expand_type(type_name, supertype, candidates, depth + 1);
        }
    }

    pub fn expand_property(
        &self,
        prefix: &str,
        type_name: &str,
        property: &str,
        property_type: &str,
        candidates: &mut Candidates,
        depth: i32,
    ) {
        if is_primitive(property) || is_primitive(type_name) {
            return;
        }

        let label = if prefix.is_empty() {
            property.to_string()
        } else {
            format!("{prefix}.{}", escape_angles(property))
        };
        add_candidate(candidates, &label, Some(&format!("{type_name}.{property}")));
        self.expand_type(&label, property_type, candidates, depth + 1);
    }
}

/// First registration of a label wins.
fn add_candidate(candidates: &mut Candidates, label: &str, detail: Option<&str>) {
    if is_primitive(label) || candidates.contains_key(label) || candidates.len() >= MAX_CANDIDATES {
        return;
    }
    candidates.insert(label.to_string(), detail.unwrap_or(label).to_string());
}
