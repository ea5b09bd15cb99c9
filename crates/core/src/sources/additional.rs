//! Request-scoped, mutable attributes for the current user.
//!
//! [`AdditionalDescriptors`] collects attributes gathered outside any store
//! (for example from an authentication handshake). It is shared between the
//! code that writes those attributes and the resolvers that read them, so
//! every accessor takes `&self` and is safe under concurrent use.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::errors::ResolveError;
use crate::person::{Person, PersonSet};
use crate::query::{AttributeMap, AttributeValues, Query};
use crate::source::{AttributeNames, AttributeSource, SourceFilter};
use crate::username::{SimpleUsernameResolver, UsernameResolver};

/// A mutable person.
#[derive(Debug, Default)]
pub struct AdditionalDescriptors {
    name: RwLock<Option<String>>,
    attributes: RwLock<AttributeMap>,
}

impl AdditionalDescriptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_name(&self, name: Option<String>) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name;
    }

    /// Append values to an attribute, creating it when absent.
    pub fn add_attribute_values(&self, attribute: &str, values: AttributeValues) {
        let mut attributes = self.attributes.write().unwrap_or_else(PoisonError::into_inner);
        match attributes.get_mut(attribute) {
            Some(Some(existing)) => existing.extend(values),
            Some(slot) => *slot = Some(values),
            None => {
                attributes.insert(attribute.to_string(), Some(values));
            }
        }
    }

    /// Replace an attribute's values. `None` stores a null list.
    pub fn set_attribute_values(&self, attribute: &str, values: Option<AttributeValues>) {
        self.attributes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(attribute.to_string(), values);
    }

    /// Replace every attribute at once.
    pub fn set_attributes(&self, attributes: AttributeMap) {
        *self.attributes.write().unwrap_or_else(PoisonError::into_inner) = attributes;
    }

    pub fn remove_attribute(&self, attribute: &str) -> Option<Option<AttributeValues>> {
        self.attributes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(attribute)
    }

    /// Point-in-time copy of the attributes.
    pub fn attributes(&self) -> AttributeMap {
        self.attributes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Immutable snapshot as a [`Person`].
    pub fn to_person(&self) -> Person {
        Person::new(self.name(), self.attributes())
    }
}

/// Serves [`AdditionalDescriptors`] for one request.
///
/// The current user is passed in explicitly when the source is built for a
/// request. Queries for anyone else, or made with no current user, cannot be
/// answered and yield `Ok(None)`.
pub struct AdditionalDescriptorsSource {
    id: String,
    descriptors: Arc<AdditionalDescriptors>,
    current_user: Option<String>,
    username_resolver: Arc<dyn UsernameResolver>,
}

impl AdditionalDescriptorsSource {
    pub fn for_request(descriptors: Arc<AdditionalDescriptors>, current_user: Option<String>) -> Self {
        Self {
            id: "additional-descriptors".to_string(),
            descriptors,
            current_user,
            username_resolver: Arc::new(SimpleUsernameResolver::default()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_username_resolver(mut self, resolver: Arc<dyn UsernameResolver>) -> Self {
        self.username_resolver = resolver;
        self
    }
}

impl AttributeSource for AdditionalDescriptorsSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn resolve_many(
        &self,
        query: &Query,
        _filter: &dyn SourceFilter,
    ) -> Result<Option<PersonSet>, ResolveError> {
        let Some(current) = self.current_user.as_deref() else {
            debug!(source = %self.id, "no current user for this request");
            return Ok(None);
        };
        match self.username_resolver.username_from_query(query) {
            Some(username) if username == current => {
                let name = self.descriptors.name().unwrap_or(username);
                let person = Person::named(name, self.descriptors.attributes());
                Ok(Some([person].into_iter().collect()))
            }
            _ => Ok(None),
        }
    }

    fn possible_result_attribute_names(&self, _filter: &dyn SourceFilter) -> Option<AttributeNames> {
        Some(self.descriptors.attributes().keys().cloned().collect())
    }
}
