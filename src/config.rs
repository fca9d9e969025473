use crate::error::{Error, Result};
use crate::language::language_folders;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// Section name clients may nest the settings under.
pub const SECTION: &str = "x4CodeComplete";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub unpacked_file_location: Option<PathBuf>,
    pub extensions_folder: Option<PathBuf>,
    pub language_number: String,
    pub limit_language_output: bool,
    pub exceedingly_verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            unpacked_file_location: None,
            extensions_folder: None,
            language_number: "44".to_string(),
            limit_language_output: false,
            exceedingly_verbose: false,
        }
    }
}

impl Settings {
    /// Reads settings from a client payload, bare or nested under [`SECTION`].
    pub fn from_value(value: Value) -> Result<Self> {
        let value = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(mut map) => match map.remove(SECTION) {
                Some(section @ Value::Object(_)) => section,
                Some(_) | None => Value::Object(map),
            },
            other => other,
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Names of required settings that are absent or empty.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_unset(&self.unpacked_file_location) {
            missing.push("unpackedFileLocation");
        }
        if is_unset(&self.extensions_folder) {
            missing.push("extensionsFolder");
        }
        missing
    }

    pub fn paths(&self) -> Result<GamePaths> {
        let unpacked = self
            .unpacked_file_location
            .clone()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or(Error::MissingSetting("unpackedFileLocation"))?;
        let extensions = self
            .extensions_folder
            .clone()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or(Error::MissingSetting("extensionsFolder"))?;
        Ok(GamePaths {
            unpacked,
            extensions,
        })
    }
}

fn is_unset(path: &Option<PathBuf>) -> bool {
    path.as_ref().map_or(true, |path| path.as_os_str().is_empty())
}

/// Locations derived from a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamePaths {
    pub unpacked: PathBuf,
    pub extensions: PathBuf,
}

impl GamePaths {
    pub fn libraries(&self) -> PathBuf {
        self.unpacked.join("libraries")
    }

    pub fn schema(&self) -> PathBuf {
        self.libraries().join("scriptproperties.xml")
    }

    pub fn ui(&self) -> PathBuf {
        self.unpacked.join("ui")
    }

    pub fn language_folders(&self) -> Vec<PathBuf> {
        language_folders(&self.unpacked, &self.extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let settings = Settings::from_value(json!({ "unpackedFileLocation": "/games/x4" })).unwrap();
        assert_eq!(settings.language_number, "44");
        assert!(!settings.limit_language_output);
        assert_eq!(settings.missing(), vec!["extensionsFolder"]);
        assert!(matches!(
            settings.paths(),
            Err(Error::MissingSetting("extensionsFolder"))
        ));
    }

    #[test]
    fn accepts_nested_section() {
        let settings = Settings::from_value(json!({
            "x4CodeComplete": {
                "unpackedFileLocation": "/games/x4",
                "extensionsFolder": "/games/x4/extensions",
                "languageNumber": "49",
                "limitLanguageOutput": true,
                "exceedinglyVerbose": true
            }
        }))
        .unwrap();
        assert!(settings.missing().is_empty());
        assert!(settings.exceedingly_verbose);

        let paths = settings.paths().unwrap();
        assert_eq!(paths.schema(), PathBuf::from("/games/x4/libraries/scriptproperties.xml"));
        assert_eq!(paths.ui(), PathBuf::from("/games/x4/ui"));
    }

    #[test]
    fn empty_strings_count_as_missing() {
        let settings = Settings::from_value(json!({
            "unpackedFileLocation": "",
            "extensionsFolder": ""
        }))
        .unwrap();
        assert_eq!(settings.missing(), vec!["unpackedFileLocation", "extensionsFolder"]);
        assert_eq!(Settings::from_value(Value::Null).unwrap(), Settings::default());
    }

    #[test]
    fn rejects_wrongly_typed_values() {
        let result = Settings::from_value(json!({ "limitLanguageOutput": "yes" }));
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }
}
