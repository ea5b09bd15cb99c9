//! Case canonicalization of attribute values and usernames.
//!
//! Canonicalization is configured per attribute. An attribute that is not
//! listed is left alone; an attribute listed without a mode uses the
//! canonicalizer's default mode, which is resolved at call time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::AttributeValues;

/// How to normalize the case of string values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CaseCanonicalizationMode {
    /// Leave values as they are.
    None,
    Upper,
    Lower,
}

/// Mode used for attributes configured without an explicit mode.
pub const DEFAULT_CASE_MODE: CaseCanonicalizationMode = CaseCanonicalizationMode::Lower;

impl std::fmt::Display for CaseCanonicalizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Upper => write!(f, "upper"),
            Self::Lower => write!(f, "lower"),
        }
    }
}

/// Locale rules that change case mapping.
///
/// Only the Turkic dotted/dotless `i` differs from the Unicode default
/// mapping for the locales this crate recognizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaseLocale {
    /// Unicode default case mapping.
    #[default]
    Root,
    /// Turkish and Azerbaijani.
    Turkic,
}

impl CaseLocale {
    /// Parse a BCP 47 / POSIX style tag such as `en`, `tr-TR` or `az_Latn`.
    pub fn from_tag(tag: &str) -> Self {
        let language = tag
            .split(['-', '_', '.'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match language.as_str() {
            "tr" | "az" => Self::Turkic,
            _ => Self::Root,
        }
    }
}

/// Apply `mode` to a single string.
pub fn canonicalize_str(value: &str, mode: CaseCanonicalizationMode, locale: CaseLocale) -> String {
    match (mode, locale) {
        (CaseCanonicalizationMode::None, _) => value.to_string(),
        (CaseCanonicalizationMode::Upper, CaseLocale::Root) => value.to_uppercase(),
        (CaseCanonicalizationMode::Lower, CaseLocale::Root) => value.to_lowercase(),
        (CaseCanonicalizationMode::Upper, CaseLocale::Turkic) => value
            .chars()
            .flat_map(|c| match c {
                'i' => vec!['\u{0130}'],
                other => other.to_uppercase().collect(),
            })
            .collect(),
        (CaseCanonicalizationMode::Lower, CaseLocale::Turkic) => value
            .chars()
            .flat_map(|c| match c {
                'I' => vec!['\u{0131}'],
                '\u{0130}' => vec!['i'],
                other => other.to_lowercase().collect(),
            })
            .collect(),
    }
}

/// Apply `mode` to every string value; other values are untouched.
pub fn canonicalize_values(
    values: &[Value],
    mode: CaseCanonicalizationMode,
    locale: CaseLocale,
) -> AttributeValues {
    values
        .iter()
        .map(|value| match value {
            Value::String(s) => Value::String(canonicalize_str(s, mode, locale)),
            other => other.clone(),
        })
        .collect()
}

/// Per-attribute modes. `None` defers to the default mode.
pub type CaseModes = IndexMap<String, Option<CaseCanonicalizationMode>>;

/// Canonicalize `values` of `attribute` according to `modes`.
///
/// Returns the input unchanged when it is null or empty or when `attribute`
/// is not present in `modes`.
pub fn canonicalize(
    values: Option<&AttributeValues>,
    attribute: &str,
    modes: &CaseModes,
    default_mode: CaseCanonicalizationMode,
    locale: CaseLocale,
) -> Option<AttributeValues> {
    let values = values?;
    if values.is_empty() {
        return Some(values.clone());
    }
    match modes.get(attribute) {
        None => Some(values.clone()),
        Some(mode) => Some(canonicalize_values(
            values,
            mode.unwrap_or(default_mode),
            locale,
        )),
    }
}

/// A configured set of per-attribute canonicalization rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseCanonicalizer {
    modes: CaseModes,
    default_mode: CaseCanonicalizationMode,
    locale: CaseLocale,
}

impl CaseCanonicalizer {
    pub fn new(modes: CaseModes, default_mode: CaseCanonicalizationMode, locale: CaseLocale) -> Self {
        Self {
            modes,
            default_mode,
            locale,
        }
    }

    /// A canonicalizer that touches nothing.
    pub fn disabled() -> Self {
        Self::new(CaseModes::new(), DEFAULT_CASE_MODE, CaseLocale::Root)
    }

    /// Whether any attribute is configured.
    pub fn is_enabled(&self) -> bool {
        !self.modes.is_empty()
    }

    pub fn locale(&self) -> CaseLocale {
        self.locale
    }

    /// Effective mode for `attribute`, or `None` when it is not configured.
    pub fn mode_for(&self, attribute: &str) -> Option<CaseCanonicalizationMode> {
        self.modes
            .get(attribute)
            .map(|mode| mode.unwrap_or(self.default_mode))
    }

    pub fn canonicalize(
        &self,
        attribute: &str,
        values: Option<&AttributeValues>,
    ) -> Option<AttributeValues> {
        canonicalize(values, attribute, &self.modes, self.default_mode, self.locale)
    }
}

impl Default for CaseCanonicalizer {
    fn default() -> Self {
        Self::disabled()
    }
}
