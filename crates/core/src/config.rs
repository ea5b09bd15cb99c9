//! TOML-based resolver configuration.
//!
//! A configuration file describes one top-level resolver, an optional cache
//! in front of it, and its ordered child sources:
//!
//! ```toml
//! [resolver]
//! kind = "cascading"
//!
//! [[sources]]
//! id = "people"
//! kind = "directory"
//! directory_file = "people.toml"
//! ```
//!
//! [`crate::assembly::build_resolver`] turns a validated configuration into
//! a live source tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::case::{CaseCanonicalizationMode, CaseLocale, CaseModes, DEFAULT_CASE_MODE};
use crate::errors::ConfigError;
use crate::mapping::{normalize_mapping, RawAttributeMapping};
use crate::merger::MergerKind;
use crate::username::DEFAULT_USERNAME_ATTRIBUTE;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// How child sources are combined.
    #[serde(default)]
    pub resolver: ResolverSection,

    /// Optional cache in front of the resolver.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Child sources, consulted in order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Directory the config was loaded from; relative paths resolve against it.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Aggregation style.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// Every source sees the caller's query.
    #[default]
    Merging,
    /// Each source sees what earlier sources found.
    Cascading,
}

/// `[resolver]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSection {
    /// Identifier used in logs (default `persondir`).
    #[serde(default = "default_resolver_id")]
    pub id: String,

    #[serde(default)]
    pub kind: ResolverKind,

    /// Merge strategy. Defaults to `multivalued` for merging resolvers and
    /// `replacing` for cascading ones.
    #[serde(default)]
    pub merger: Option<MergerKind>,

    /// Log and skip failing sources instead of failing the lookup.
    #[serde(default = "default_true")]
    pub recover_exceptions: bool,

    /// Stop after the first source that does not fail.
    #[serde(default)]
    pub stop_on_success: bool,

    /// Cascading only: give up when nothing was found after the first source.
    #[serde(default)]
    pub stop_if_first_source_returns_null: bool,

    /// Query attribute carrying the username.
    #[serde(default = "default_username_attribute")]
    pub username_attribute: String,
}

fn default_resolver_id() -> String {
    "persondir".into()
}
fn default_username_attribute() -> String {
    DEFAULT_USERNAME_ATTRIBUTE.into()
}
fn default_true() -> bool {
    true
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            id: default_resolver_id(),
            kind: ResolverKind::default(),
            merger: None,
            recover_exceptions: true,
            stop_on_success: false,
            stop_if_first_source_returns_null: false,
            username_attribute: default_username_attribute(),
        }
    }
}

impl ResolverSection {
    /// The merger in effect, applying the per-kind default.
    pub fn effective_merger(&self) -> MergerKind {
        self.merger.unwrap_or(match self.kind {
            ResolverKind::Merging => MergerKind::Multivalued,
            ResolverKind::Cascading => MergerKind::Replacing,
        })
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// `[cache]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Query attributes forming the cache key. All attributes when unset.
    #[serde(default)]
    pub key_attributes: Option<Vec<String>>,

    /// Remember lookups that found nothing.
    #[serde(default)]
    pub cache_null_results: bool,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Built-in source implementations selectable from configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Fixed attributes for any named user.
    Static,
    /// People from a directory file and/or inline tables.
    #[default]
    Directory,
    /// The query itself.
    Echo,
}

/// One `[[sources]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub kind: SourceKind,

    /// `static`: the attributes returned for every user.
    #[serde(default)]
    pub attributes: IndexMap<String, Value>,

    /// `directory`: TOML directory file to load.
    #[serde(default)]
    pub directory_file: Option<PathBuf>,

    /// `directory`: inline entries, keyed by username.
    #[serde(default)]
    pub people: IndexMap<String, IndexMap<String, Value>>,

    /// `directory`: match on this attribute instead of the username.
    #[serde(default)]
    pub key_attribute: Option<String>,

    /// Caller attribute -> store attribute(s).
    #[serde(default)]
    pub query_mapping: Option<RawAttributeMapping>,

    /// Store attribute -> caller attribute(s).
    #[serde(default)]
    pub result_mapping: Option<RawAttributeMapping>,

    #[serde(default)]
    pub require_all_query_attributes: bool,

    #[serde(default = "default_true")]
    pub use_all_query_attributes: bool,

    /// Raw attribute naming unnamed results.
    #[serde(default)]
    pub unmapped_username_attribute: Option<String>,

    /// Enable `attr;` key-family passthrough in the result mapping.
    #[serde(default)]
    pub family_passthrough: bool,

    /// Only consult this source when these attributes match the patterns.
    #[serde(default)]
    pub gateway_patterns: IndexMap<String, String>,

    /// Require every gateway pattern to match (default) or just one.
    #[serde(default = "default_true")]
    pub gateway_match_all: bool,

    #[serde(default)]
    pub case: CaseConfig,
}

impl SourceConfig {
    /// Whether any mapping or canonicalization wraps this source.
    pub fn needs_mapper(&self) -> bool {
        self.query_mapping.is_some()
            || self.result_mapping.is_some()
            || self.require_all_query_attributes
            || !self.use_all_query_attributes
            || self.unmapped_username_attribute.is_some()
            || self.family_passthrough
            || self.case.is_configured()
    }
}

/// A per-attribute case setting as written in configuration. `default`
/// defers to the section's `default_mode`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfiguredCase {
    None,
    Upper,
    Lower,
    Default,
}

impl ConfiguredCase {
    fn into_mode(self) -> Option<CaseCanonicalizationMode> {
        match self {
            Self::None => Some(CaseCanonicalizationMode::None),
            Self::Upper => Some(CaseCanonicalizationMode::Upper),
            Self::Lower => Some(CaseCanonicalizationMode::Lower),
            Self::Default => None,
        }
    }
}

/// `[sources.case]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseConfig {
    /// Query attribute (caller-side name) -> mode.
    #[serde(default)]
    pub query: IndexMap<String, ConfiguredCase>,

    /// Result attribute (caller-side name) -> mode.
    #[serde(default)]
    pub result: IndexMap<String, ConfiguredCase>,

    /// Mode applied to result names.
    #[serde(default)]
    pub username: Option<CaseCanonicalizationMode>,

    /// Mode for attributes set to `default`.
    #[serde(default = "default_case_mode")]
    pub default_mode: CaseCanonicalizationMode,

    /// Locale tag such as `en` or `tr-TR`.
    #[serde(default)]
    pub locale: Option<String>,
}

fn default_case_mode() -> CaseCanonicalizationMode {
    DEFAULT_CASE_MODE
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            query: IndexMap::new(),
            result: IndexMap::new(),
            username: None,
            default_mode: default_case_mode(),
            locale: None,
        }
    }
}

impl CaseConfig {
    pub fn is_configured(&self) -> bool {
        !self.query.is_empty() || !self.result.is_empty() || self.username.is_some()
    }

    pub fn locale(&self) -> CaseLocale {
        self.locale
            .as_deref()
            .map(CaseLocale::from_tag)
            .unwrap_or_default()
    }

    pub fn query_modes(&self) -> CaseModes {
        to_modes(&self.query)
    }

    pub fn result_modes(&self) -> CaseModes {
        to_modes(&self.result)
    }
}

fn to_modes(configured: &IndexMap<String, ConfiguredCase>) -> CaseModes {
    configured
        .iter()
        .map(|(name, case)| (name.clone(), case.into_mode()))
        .collect()
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl ResolverConfig {
    /// Load a [`ResolverConfig`] from a TOML file at the given path.
    ///
    /// This does **not** validate -- call [`validate`](Self::validate)
    /// afterwards, or use [`load_and_validate`](Self::load_and_validate).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.base_dir = path.parent().map(Path::to_path_buf);

        debug!(sources = config.sources.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolver.username_attribute.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "resolver.username_attribute".into(),
                detail: "username attribute must not be empty".into(),
            });
        }
        if self.sources.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sources".into(),
                detail: "at least one source must be configured".into(),
            });
        }
        if let Some(keys) = &self.cache.key_attributes {
            if keys.is_empty() || keys.iter().any(|k| k.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "cache.key_attributes".into(),
                    detail: "key attributes must be non-empty names; omit to key on all".into(),
                });
            }
        }
        if self.resolver.stop_if_first_source_returns_null
            && self.resolver.kind != ResolverKind::Cascading
        {
            warn!("stop_if_first_source_returns_null only applies to cascading resolvers");
        }

        let mut seen = HashSet::new();
        for (index, source) in self.sources.iter().enumerate() {
            if source.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("sources[{index}].id"),
                    detail: "source id must not be empty".into(),
                });
            }
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("sources[{index}].id"),
                    detail: format!("duplicate source id '{}'", source.id),
                });
            }
            self.validate_source(index, source)?;
        }

        Ok(())
    }

    fn validate_source(&self, index: usize, source: &SourceConfig) -> Result<(), ConfigError> {
        for mapping in [&source.query_mapping, &source.result_mapping].into_iter().flatten() {
            normalize_mapping(mapping).map_err(|error| ConfigError::Assembly {
                source_id: source.id.clone(),
                error,
            })?;
        }

        if let Some(attribute) = &source.key_attribute {
            if attribute.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("sources[{index}].key_attribute"),
                    detail: "key attribute must not be empty".into(),
                });
            }
        }

        match source.kind {
            SourceKind::Static if source.attributes.is_empty() => {
                warn!(source = %source.id, "static source has no attributes");
            }
            SourceKind::Directory
                if source.directory_file.is_none() && source.people.is_empty() =>
            {
                warn!(source = %source.id, "directory source has no entries");
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolve a path from the config relative to the config file.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Annotated starting configuration written by `persondir init`.
pub const SAMPLE_CONFIG: &str = r#"# persondir configuration

[resolver]
kind = "cascading"            # merging | cascading
# merger = "replacing"        # multivalued | multivalued_distinct | replacing | noncolliding
recover_exceptions = true
stop_on_success = false
stop_if_first_source_returns_null = false
username_attribute = "username"

[cache]
enabled = true
key_attributes = ["username"]
cache_null_results = false

[[sources]]
id = "accounts"
kind = "directory"
tags = ["directory"]
# directory_file = "people.toml"

[sources.people.edalquist]
mail = "edalquist@example.edu"
studentId = "123"

[sources.people.jdoe]
mail = "jdoe@example.edu"
studentId = "456"

[sources.result_mapping]
mail = ["mail", "email"]
studentId = true

[[sources]]
id = "registrar"
kind = "directory"
key_attribute = "studentId"
tags = ["sis"]

[sources.people.row-1]
studentId = "123"
major = "CS"

[sources.people.row-2]
studentId = "456"
major = "Math"

[sources.case.result]
major = "upper"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_sample_config() {
        let config = ResolverConfig::parse(SAMPLE_CONFIG).expect("failed to parse toml");
        assert_eq!(config.resolver.kind, ResolverKind::Cascading);
        assert_eq!(config.resolver.effective_merger(), MergerKind::Replacing);
        assert!(config.cache.enabled);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].key_attribute.as_deref(), Some("studentId"));
        assert_eq!(
            config.sources[1].case.result["major"],
            ConfiguredCase::Upper
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persondir.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

        let config = ResolverConfig::load_and_validate(&path).expect("load failed");
        assert_eq!(config.base_dir.as_deref(), Some(dir.path()));
        assert_eq!(
            config.resolve_path(Path::new("people.toml")),
            dir.path().join("people.toml")
        );
        assert_eq!(
            config.resolve_path(Path::new("/etc/people.toml")),
            PathBuf::from("/etc/people.toml")
        );
    }

    #[test]
    fn test_file_not_found() {
        let result = ResolverConfig::load_from_file("/nonexistent/persondir.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::parse("[[sources]]\nid = \"a\"").unwrap();
        assert_eq!(config.resolver.id, "persondir");
        assert_eq!(config.resolver.kind, ResolverKind::Merging);
        assert_eq!(config.resolver.effective_merger(), MergerKind::Multivalued);
        assert!(config.resolver.recover_exceptions);
        assert!(!config.resolver.stop_on_success);
        assert_eq!(config.resolver.username_attribute, "username");
        assert!(!config.cache.enabled);

        let source = &config.sources[0];
        assert_eq!(source.kind, SourceKind::Directory);
        assert!(source.use_all_query_attributes);
        assert!(!source.needs_mapper());
        assert_eq!(source.case.default_mode, CaseCanonicalizationMode::Lower);
    }

    #[test]
    fn test_validate_rejects_no_sources() {
        let config = ResolverConfig::parse("[resolver]\nkind = \"merging\"").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sources"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let config = ResolverConfig::parse("[[sources]]\nid = \"a\"\n[[sources]]\nid = \"a\"").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sources[1].id"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_mapping() {
        let config = ResolverConfig::parse(
            "[[sources]]\nid = \"a\"\n[sources.query_mapping]\nusername = false",
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Assembly { ref source_id, .. }) if source_id == "a"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_cache_keys() {
        let config =
            ResolverConfig::parse("[cache]\nkey_attributes = []\n[[sources]]\nid = \"a\"").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "cache.key_attributes"
        ));
    }

    #[test]
    fn test_case_config() {
        let config = ResolverConfig::parse(
            r#"
[[sources]]
id = "a"
[sources.case]
username = "lower"
default_mode = "upper"
locale = "tr"
[sources.case.query]
uid = "default"
mail = "none"
"#,
        )
        .unwrap();
        let case = &config.sources[0].case;
        assert!(case.is_configured());
        assert_eq!(case.locale(), CaseLocale::Turkic);
        let modes = case.query_modes();
        assert_eq!(modes["uid"], None);
        assert_eq!(modes["mail"], Some(CaseCanonicalizationMode::None));
        assert!(config.sources[0].needs_mapper());
    }
}
