//! Username extraction from queries.

use tracing::debug;

use crate::query::{render_value, Query, WILDCARD};

/// Attribute name used for usernames unless configured otherwise.
pub const DEFAULT_USERNAME_ATTRIBUTE: &str = "username";

/// Knows which query attribute carries the username.
pub trait UsernameResolver: Send + Sync {
    /// Name of the username attribute. Never empty.
    fn username_attribute_name(&self) -> &str;

    /// Extract a concrete username from `query`.
    ///
    /// Looks at the configured attribute, then at
    /// [`DEFAULT_USERNAME_ATTRIBUTE`]. Takes the first non-null value,
    /// trims it, and returns `None` when it is empty or contains the
    /// wildcard (wildcard queries are searches, not usernames).
    fn username_from_query(&self, query: &Query) -> Option<String> {
        let values = query
            .get(self.username_attribute_name())
            .or_else(|| query.get(DEFAULT_USERNAME_ATTRIBUTE))?
            .as_ref()?;

        let raw = values.iter().find_map(render_value)?;
        let username = raw.trim();
        if username.is_empty() || username.contains(WILDCARD) {
            debug!(username, "query does not name a concrete user");
            return None;
        }
        Some(username.to_string())
    }
}

/// [`UsernameResolver`] backed by a fixed attribute name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleUsernameResolver {
    attribute: String,
}

impl SimpleUsernameResolver {
    /// Blank names fall back to [`DEFAULT_USERNAME_ATTRIBUTE`].
    pub fn new(attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        let attribute = if attribute.trim().is_empty() {
            DEFAULT_USERNAME_ATTRIBUTE.to_string()
        } else {
            attribute
        };
        Self { attribute }
    }
}

impl Default for SimpleUsernameResolver {
    fn default() -> Self {
        Self::new(DEFAULT_USERNAME_ATTRIBUTE)
    }
}

impl UsernameResolver for SimpleUsernameResolver {
    fn username_attribute_name(&self) -> &str {
        &self.attribute
    }
}
