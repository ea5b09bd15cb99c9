//! persondir core library.
//!
//! This crate resolves identity attributes (mail, phone, group memberships,
//! ...) for a username or an attribute query by consulting one or more
//! sources: the single-source lookup contract, attribute-name mapping and
//! case canonicalization, merge strategies, merging and cascading
//! aggregation, result caching, and configuration-driven assembly.

pub mod aggregate;
pub mod assembly;
pub mod cache;
pub mod case;
pub mod config;
pub mod directory_file;
pub mod errors;
pub mod mapped;
pub mod mapping;
pub mod merger;
pub mod person;
pub mod query;
pub mod source;
pub mod sources;
pub mod username;

// Re-exports for convenience.
pub use aggregate::{AggregatingResolver, CascadingResolver, MergingResolver};
pub use assembly::build_resolver;
pub use cache::{CachingSource, InMemoryCacheStore};
pub use config::ResolverConfig;
pub use errors::{ConfigError, CoreError, ResolveError};
pub use mapping::AttributeNameMapper;
pub use person::{Person, PersonSet};
pub use query::{AttributeMap, Query};
pub use source::{AttributeSource, SourceFilter, ALWAYS};
