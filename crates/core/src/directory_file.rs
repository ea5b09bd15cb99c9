//! TOML-based people directory reader/writer.
//!
//! The directory file format:
//!
//! ```toml
//! [people.jdoe]
//! mail = "jdoe@example.edu"
//! groups = ["staff", "faculty"]
//!
//! [people.alice]
//! mail = "alice@example.edu"
//! ```
//!
//! Scalars load as one-element value lists; arrays load as lists.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::DirectoryFileError;
use crate::query::AttributeMap;
use crate::sources::InMemoryDirectory;

/// Entries keyed by username.
pub type DirectoryEntries = IndexMap<String, AttributeMap>;

/// Wrapper around the TOML directory file structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirectoryFileData {
    /// The `[people]` table mapping username -> attributes.
    #[serde(default)]
    pub people: IndexMap<String, IndexMap<String, Value>>,
}

/// Convert TOML-style attributes to value lists: arrays are kept as lists,
/// anything else becomes a one-element list.
pub fn promote_values(raw: IndexMap<String, Value>) -> AttributeMap {
    raw.into_iter()
        .map(|(name, value)| {
            let values = match value {
                Value::Array(items) => items,
                scalar => vec![scalar],
            };
            (name, Some(values))
        })
        .collect()
}

/// Utilities for loading and saving directory files.
pub struct DirectoryFile;

impl DirectoryFile {
    /// Load the directory file from disk and return its entries.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<DirectoryEntries, DirectoryFileError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading directory file");

        if !path.exists() {
            return Err(DirectoryFileError::NotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let entries = Self::parse(&contents)?;

        debug!(count = entries.len(), "loaded directory entries");
        Ok(entries)
    }

    /// Parse directory file contents.
    pub fn parse(contents: &str) -> Result<DirectoryEntries, DirectoryFileError> {
        let data: DirectoryFileData =
            toml::from_str(contents).map_err(|e| DirectoryFileError::ParseError(e.to_string()))?;

        let mut entries = DirectoryEntries::with_capacity(data.people.len());
        for (uid, raw) in data.people {
            if uid.trim().is_empty() {
                return Err(DirectoryFileError::InvalidEntry {
                    uid,
                    detail: "username must not be empty".into(),
                });
            }
            entries.insert(uid, promote_values(raw));
        }
        Ok(entries)
    }

    /// Load the file into a new [`InMemoryDirectory`].
    pub fn load_directory<P: AsRef<Path>>(
        id: &str,
        path: P,
    ) -> Result<InMemoryDirectory, DirectoryFileError> {
        let entries = Self::load(path)?;
        Ok(entries
            .into_iter()
            .fold(InMemoryDirectory::new(id), |directory, (uid, attributes)| {
                directory.with_entry(uid, attributes)
            }))
    }

    /// Save entries back to disk in TOML format.
    ///
    /// One-element lists are written as scalars; null lists are omitted
    /// since TOML has no null.
    pub fn save<P: AsRef<Path>>(
        path: P,
        entries: &DirectoryEntries,
    ) -> Result<(), DirectoryFileError> {
        let path = path.as_ref();
        info!(path = %path.display(), "saving directory file");

        let people = entries
            .iter()
            .map(|(uid, attributes)| {
                let table = attributes
                    .iter()
                    .filter_map(|(name, values)| {
                        let values = values.as_ref()?;
                        let value = match values.as_slice() {
                            [single] => single.clone(),
                            many => Value::Array(many.to_vec()),
                        };
                        Some((name.clone(), value))
                    })
                    .collect();
                (uid.clone(), table)
            })
            .collect();

        let toml_str = toml::to_string_pretty(&DirectoryFileData { people })
            .map_err(|e| DirectoryFileError::ParseError(e.to_string()))?;
        std::fs::write(path, toml_str)?;

        debug!(count = entries.len(), "saved directory entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::seed_query;
    use crate::source::{AttributeSource, ALWAYS};
    use serde_json::json;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[people.jdoe]
mail = "jdoe@example.edu"
groups = ["staff", "faculty"]
age = 42

[people.alice]
mail = "alice@example.edu"
"#;

    #[test]
    fn test_parse_promotes_scalars() {
        let entries = DirectoryFile::parse(SAMPLE).unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["jdoe", "alice"]);
        let jdoe = &entries["jdoe"];
        assert_eq!(jdoe["mail"], Some(vec![json!("jdoe@example.edu")]));
        assert_eq!(jdoe["groups"], Some(vec![json!("staff"), json!("faculty")]));
        assert_eq!(jdoe["age"], Some(vec![json!(42)]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            DirectoryFile::parse("people = 3"),
            Err(DirectoryFileError::ParseError(_))
        ));
        assert!(matches!(
            DirectoryFile::parse("[people.\"\"]\nmail = \"x\""),
            Err(DirectoryFileError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = DirectoryFile::load("/nonexistent/people.toml");
        assert!(matches!(result, Err(DirectoryFileError::NotFound(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.toml");

        let mut entries = DirectoryFile::parse(SAMPLE).unwrap();
        entries["alice"].insert("nickname".into(), None);
        DirectoryFile::save(&path, &entries).unwrap();

        let reloaded = DirectoryFile::load(&path).unwrap();
        assert_eq!(reloaded["jdoe"], entries["jdoe"]);
        assert!(!reloaded["alice"].contains_key("nickname"));
    }

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let directory = DirectoryFile::load_directory("file", &path).unwrap();
        let person = directory
            .resolve_one(&seed_query("username", "alice"), &ALWAYS)
            .unwrap()
            .unwrap();
        assert_eq!(person.attribute_value("mail"), Some(&json!("alice@example.edu")));
    }
}
