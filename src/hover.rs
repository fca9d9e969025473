//! Hover text for dotted schema paths.
//!
//! Two passes feed the text: a walk of the path through the entry's
//! properties, and a fuzzy pass listing every entry whose name or property
//! names mention the hovered word. Paths that yield nothing are retried with
//! their leftmost segment dropped.

use crate::schema::{Schema, SchemaEntry, ScriptProperty};
use crate::text::run_at;
use crate::variables::normalize;
use crate::xml::escape_angles;
use std::collections::BTreeMap;
use tracing::debug;

/// The word under the cursor and the dotted phrase it ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoverTarget {
    pub word: String,
    pub parts: Vec<String>,
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn is_phrase_char(ch: char) -> bool {
    is_word_char(ch) || matches!(ch, '.' | '$' | '@' | '{' | '}')
}

/// Finds the hovered word on `line` and the phrase around it, cut right after the word.
pub fn hover_target(line: &str, column: u32) -> Option<HoverTarget> {
    let (word_start, word_end) = run_at(line, column, is_word_char)?;
    let (phrase_start, _) = run_at(line, column, is_phrase_char)?;
    let phrase = &line[phrase_start..word_end];
    Some(HoverTarget {
        word: line[word_start..word_end].to_string(),
        parts: phrase.split('.').map(str::to_string).collect(),
    })
}

/// Tries each suffix of the path in turn; the first non-empty text wins.
pub fn schema_hover(schema: &Schema, target: &HoverTarget) -> Option<String> {
    if target.word.is_empty() {
        return None;
    }
    (0..target.parts.len())
        .map(|skip| &target.parts[skip..])
        .find_map(|parts| {
            let text = compose(schema, parts, &target.word);
            if text.is_empty() {
                debug!(?parts, "no hover text, shortening path");
                None
            } else {
                Some(text)
            }
        })
}

fn compose(schema: &Schema, parts: &[String], word: &str) -> String {
    let mut text = String::new();
    if let Some(first) = parts.first().map(|part| normalize(part)) {
        if first != word {
            if let Some(entry) = schema.entry(first) {
                text.push_str(&keyword_text(schema, entry, parts));
            }
        }
    }
    text.push_str(&hover_word_text(schema, word));
    text
}

/// Walks `parts[1..]` starting at `entry`; empty unless some property matched.
pub fn keyword_text(schema: &Schema, entry: SchemaEntry<'_>, parts: &[String]) -> String {
    let mut text = format!("Keyword: {}\n", entry.name());
    for (label, value) in details(entry) {
        text.push_str(&format!("\n{label}: {value}\n"));
    }

    let mut name = entry.name().to_string();
    let mut current: &[ScriptProperty] = entry.properties();
    let mut updated = false;

    for (idx, part) in parts.iter().enumerate().skip(1) {
        let last = idx == parts.len() - 1;
        let matched: Vec<&ScriptProperty> = if last {
            current
                .iter()
                .filter(|property| mentions(&property.name, part))
                .collect()
        } else {
            let direct: Vec<_> = current.iter().filter(|property| property.name == *part).collect();
            if direct.is_empty() {
                // resolve through the declared types of the current properties
                current
                    .iter()
                    .filter_map(|property| property.type_name.as_deref())
                    .filter_map(|type_name| schema.datatype(type_name))
                    .flat_map(|datatype| datatype.properties.iter())
                    .filter(|property| property.name == *part)
                    .collect()
            } else {
                direct
            }
        };

        if matched.is_empty() {
            current = &[];
            continue;
        }

        for property in matched {
            let Some(result) = property.result.as_deref() else {
                continue;
            };
            text.push_str(&format!("\n\n- {name}.{}: {result}", property.name));
            updated = true;
            if let Some(type_name) = property.type_name.as_deref() {
                current = schema
                    .datatype(type_name)
                    .map(|datatype| datatype.properties.as_slice())
                    .unwrap_or(&[]);
            }
        }
        name.push('.');
        name.push_str(part);
    }

    if updated {
        escape_angles(&text)
    } else {
        String::new()
    }
}

fn details(entry: SchemaEntry<'_>) -> Vec<(&'static str, &str)> {
    let fields = match entry {
        SchemaEntry::Keyword(keyword) => vec![
            ("Description", keyword.description.as_deref()),
            ("Pseudo", keyword.pseudo.as_deref()),
            ("Result", keyword.result.as_deref()),
            ("Suffix", keyword.suffix.as_deref()),
        ],
        SchemaEntry::Datatype(datatype) => vec![("Suffix", datatype.suffix.as_deref())],
    };
    fields
        .into_iter()
        .filter_map(|(label, value)| value.map(|value| (label, value)))
        .collect()
}

/// Final-part match: substring, or a `{$part}` placeholder in any case.
fn mentions(property_name: &str, part: &str) -> bool {
    property_name.contains(part)
        || property_name
            .to_lowercase()
            .contains(&format!("{{${}}}", part.to_lowercase()))
}

#[derive(Debug, Default)]
struct MatchGroup {
    description: Vec<String>,
    type_names: Vec<String>,
    pseudo: Vec<String>,
    suffix: Vec<String>,
    properties: Vec<String>,
}

impl MatchGroup {
    fn add_properties(&mut self, owner: &str, properties: &[ScriptProperty], word: &str) {
        let exact = owner == word;
        for property in properties {
            if !exact && !property.name.contains(word) {
                continue;
            }
            if let Some(result) = property.result.as_deref() {
                self.properties.push(format!("- {owner}.{}: {result}", property.name));
            }
        }
    }

    fn render(mut self, header: &str) -> Option<String> {
        for list in [
            &mut self.description,
            &mut self.type_names,
            &mut self.pseudo,
            &mut self.suffix,
            &mut self.properties,
        ] {
            list.sort();
            list.dedup();
        }
        if self.properties.is_empty() {
            return None;
        }

        let mut text = header.to_string();
        if !self.description.is_empty() {
            text.push_str(&format!(": {}", self.description.join(" | ")));
        }
        if !self.type_names.is_empty() {
            text.push_str(&format!(" (type: {})", self.type_names.join(" | ")));
        }
        if !self.pseudo.is_empty() {
            text.push_str(&format!(" (pseudo: {})", self.pseudo.join(" | ")));
        }
        if !self.suffix.is_empty() {
            text.push_str(&format!(" (suffix: {})", self.suffix.join(" | ")));
        }
        text.push('\n');
        text.push_str(&self.properties.join("\n"));
        Some(text)
    }
}

/// Every keyword/datatype mentioning `word` in its name or property names.
pub fn hover_word_text(schema: &Schema, word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let mentioned = |name: &str, properties: &[ScriptProperty]| {
        name.contains(word) || properties.iter().any(|property| property.name.contains(word))
    };

    let mut groups: BTreeMap<&str, MatchGroup> = BTreeMap::new();
    for keyword in &schema.keywords {
        if !mentioned(keyword.name.as_str(), keyword.properties.as_slice()) {
            continue;
        }
        let group = groups.entry(keyword.name.as_str()).or_default();
        group.description.extend(keyword.description.clone());
        group.type_names.extend(keyword.type_name.clone());
        group.pseudo.extend(keyword.pseudo.clone());
        group.add_properties(&keyword.name, &keyword.properties, word);
    }
    for datatype in &schema.datatypes {
        if !mentioned(datatype.name.as_str(), datatype.properties.as_slice()) {
            continue;
        }
        let group = groups.entry(datatype.name.as_str()).or_default();
        group.type_names.extend(datatype.type_name.clone());
        group.suffix.extend(datatype.suffix.clone());
        group.add_properties(&datatype.name, &datatype.properties, word);
    }

    let sections: Vec<String> = groups
        .into_iter()
        .filter_map(|(header, group)| group.render(header))
        .collect();
    if sections.is_empty() {
        return String::new();
    }
    let matches = escape_angles(&sections.join("\n\n"));
    format!("\n\nMatches for '{word}':\n\n{matches}")
}
