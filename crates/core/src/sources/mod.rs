//! Built-in attribute sources.
//!
//! These cover stubs, fixtures and request-scoped data. Real stores
//! (directories, databases, web services) live outside this crate and
//! implement [`AttributeSource`](crate::source::AttributeSource) directly.

pub mod additional;
pub mod directory;
pub mod echo;
pub mod gateway;
pub mod static_source;

pub use additional::{AdditionalDescriptors, AdditionalDescriptorsSource};
pub use directory::InMemoryDirectory;
pub use echo::EchoSource;
pub use gateway::RegexGatewaySource;
pub use static_source::StaticSource;
