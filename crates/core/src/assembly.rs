//! Builds a live resolver tree from a [`ResolverConfig`].
//!
//! Each configured source is wrapped, innermost first, in:
//! 1. a [`MappedSource`] when it has mappings or case settings,
//! 2. a [`RegexGatewaySource`] when it has gateway patterns,
//!
//! and the sources are then combined by a merging or cascading resolver,
//! optionally behind a [`CachingSource`].

use std::sync::Arc;

use tracing::info;

use crate::aggregate::{CascadingResolver, MergingResolver};
use crate::cache::{AttributeCacheKeyGenerator, CachingSource, InMemoryCacheStore};
use crate::case::CaseCanonicalizer;
use crate::config::{ResolverConfig, ResolverKind, SourceConfig, SourceKind};
use crate::directory_file::{promote_values, DirectoryFile};
use crate::errors::{ConfigError, ResolveError};
use crate::mapped::MappedSource;
use crate::mapping::{normalize_mapping, AttributeNameMapper};
use crate::source::AttributeSource;
use crate::sources::{EchoSource, InMemoryDirectory, RegexGatewaySource, StaticSource};
use crate::username::{SimpleUsernameResolver, UsernameResolver};

/// Assemble the resolver described by `config`.
///
/// Expects a configuration that passed [`ResolverConfig::validate`];
/// mapping and pattern problems still surface as [`ConfigError::Assembly`].
pub fn build_resolver(config: &ResolverConfig) -> Result<Arc<dyn AttributeSource>, ConfigError> {
    let section = &config.resolver;
    let username_resolver: Arc<dyn UsernameResolver> =
        Arc::new(SimpleUsernameResolver::new(section.username_attribute.clone()));

    let sources = config
        .sources
        .iter()
        .map(|source| build_source(config, source, &username_resolver))
        .collect::<Result<Vec<_>, _>>()?;

    let merger = section.effective_merger();
    info!(
        resolver = %section.id,
        kind = ?section.kind,
        merger = %merger,
        sources = sources.len(),
        "assembling resolver"
    );

    let resolver: Arc<dyn AttributeSource> = match section.kind {
        ResolverKind::Merging => Arc::new(
            MergingResolver::new(sources)
                .with_id(section.id.clone())
                .with_merger(merger.build())
                .with_recover_exceptions(section.recover_exceptions)
                .with_stop_on_success(section.stop_on_success)
                .with_username_resolver(Arc::clone(&username_resolver)),
        ),
        ResolverKind::Cascading => Arc::new(
            CascadingResolver::new(sources)
                .with_id(section.id.clone())
                .with_merger(merger.build())
                .with_recover_exceptions(section.recover_exceptions)
                .with_stop_on_success(section.stop_on_success)
                .with_stop_if_first_source_returns_null(section.stop_if_first_source_returns_null)
                .with_username_resolver(Arc::clone(&username_resolver)),
        ),
    };

    if !config.cache.enabled {
        return Ok(resolver);
    }

    let key_generator = match &config.cache.key_attributes {
        Some(keys) => AttributeCacheKeyGenerator::with_key_attributes(keys.iter().cloned()),
        None => AttributeCacheKeyGenerator::all_attributes(),
    };
    let cached = CachingSource::new(resolver, Arc::new(InMemoryCacheStore::new()))
        .with_key_generator(Arc::new(key_generator))
        .with_cache_null_results(config.cache.cache_null_results);
    Ok(Arc::new(cached))
}

fn assembly_error(source: &SourceConfig) -> impl Fn(ResolveError) -> ConfigError + '_ {
    move |error| ConfigError::Assembly {
        source_id: source.id.clone(),
        error,
    }
}

fn build_source(
    config: &ResolverConfig,
    source: &SourceConfig,
    username_resolver: &Arc<dyn UsernameResolver>,
) -> Result<Arc<dyn AttributeSource>, ConfigError> {
    let resolver = Arc::clone(username_resolver);
    let mut built: Arc<dyn AttributeSource> = match source.kind {
        SourceKind::Static => Arc::new(
            StaticSource::new(source.id.clone(), promote_values(source.attributes.clone()))
                .with_tags(source.tags.clone())
                .with_username_resolver(resolver),
        ),
        SourceKind::Echo => Arc::new(
            EchoSource::new(source.id.clone())
                .with_tags(source.tags.clone())
                .with_username_resolver(resolver),
        ),
        SourceKind::Directory => {
            let mut directory = match &source.directory_file {
                Some(path) => DirectoryFile::load_directory(&source.id, config.resolve_path(path))?,
                None => InMemoryDirectory::new(source.id.clone()),
            };
            for (uid, attributes) in &source.people {
                directory.insert(uid.clone(), promote_values(attributes.clone()));
            }
            if let Some(attribute) = &source.key_attribute {
                directory = directory.with_key_attribute(attribute.clone());
            }
            Arc::new(
                directory
                    .with_tags(source.tags.clone())
                    .with_username_resolver(resolver),
            )
        }
    };

    if source.needs_mapper() {
        let mapper = build_mapper(source, username_resolver)?;
        built = Arc::new(
            MappedSource::new(built, mapper).with_username_resolver(Arc::clone(username_resolver)),
        );
    }

    if !source.gateway_patterns.is_empty() {
        let mut gateway = RegexGatewaySource::new(built).with_match_all(source.gateway_match_all);
        for (attribute, pattern) in &source.gateway_patterns {
            gateway = gateway
                .with_pattern(attribute.clone(), pattern)
                .map_err(assembly_error(source))?;
        }
        built = Arc::new(gateway);
    }

    Ok(built)
}

fn build_mapper(
    source: &SourceConfig,
    username_resolver: &Arc<dyn UsernameResolver>,
) -> Result<AttributeNameMapper, ConfigError> {
    let case = &source.case;
    let locale = case.locale();

    let mut mapper = AttributeNameMapper::new()
        .require_all_query_attributes(source.require_all_query_attributes)
        .use_all_query_attributes(source.use_all_query_attributes)
        .with_query_case(CaseCanonicalizer::new(case.query_modes(), case.default_mode, locale))
        .with_result_case(CaseCanonicalizer::new(case.result_modes(), case.default_mode, locale))
        .with_username_case(case.username, locale)
        .with_username_resolver(Arc::clone(username_resolver))
        .with_family_passthrough(source.family_passthrough);

    if let Some(attribute) = &source.unmapped_username_attribute {
        mapper = mapper.with_unmapped_username_attribute(attribute.clone());
    }
    if let Some(raw) = &source.query_mapping {
        let mapping = normalize_mapping(raw).map_err(assembly_error(source))?;
        mapper = mapper
            .with_query_mapping(mapping)
            .map_err(assembly_error(source))?;
    }
    if let Some(raw) = &source.result_mapping {
        let mapping = normalize_mapping(raw).map_err(assembly_error(source))?;
        mapper = mapper
            .with_result_mapping(mapping)
            .map_err(assembly_error(source))?;
    }
    Ok(mapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SAMPLE_CONFIG;
    use crate::query::seed_query;
    use crate::source::ALWAYS;
    use serde_json::json;

    #[test]
    fn test_sample_config_cascades() {
        let config = ResolverConfig::parse(SAMPLE_CONFIG).unwrap();
        let resolver = build_resolver(&config).unwrap();

        let person = resolver
            .resolve_one(&seed_query("username", "edalquist"), &ALWAYS)
            .unwrap()
            .unwrap();
        assert_eq!(person.name(), Some("edalquist"));
        assert_eq!(person.attribute_value("email"), Some(&json!("edalquist@example.edu")));
        assert_eq!(person.attribute_value("studentId"), Some(&json!("123")));
        assert_eq!(person.attribute_value("major"), Some(&json!("CS")));
    }

    #[test]
    fn test_gateway_patterns_gate_source() {
        let config = ResolverConfig::parse(
            r#"
[[sources]]
id = "defaults"
kind = "static"
gateway_patterns = { username = "^[a-z]+$" }
[sources.attributes]
affiliation = "member"
"#,
        )
        .unwrap();
        let resolver = build_resolver(&config).unwrap();
        assert!(resolver
            .resolve_many(&seed_query("username", "jdoe"), &ALWAYS)
            .unwrap()
            .is_some());
        assert_eq!(
            resolver
                .resolve_many(&seed_query("username", "J.Doe"), &ALWAYS)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_bad_pattern_is_assembly_error() {
        let config = ResolverConfig::parse(
            "[[sources]]\nid = \"x\"\nkind = \"echo\"\ngateway_patterns = { uid = \"(\" }",
        )
        .unwrap();
        assert!(matches!(
            build_resolver(&config),
            Err(ConfigError::Assembly { ref source_id, .. }) if source_id == "x"
        ));
    }

    #[test]
    fn test_missing_directory_file() {
        let config = ResolverConfig::parse(
            "[[sources]]\nid = \"x\"\ndirectory_file = \"/nonexistent/people.toml\"",
        )
        .unwrap();
        assert!(matches!(
            build_resolver(&config),
            Err(ConfigError::DirectoryFile(_))
        ));
    }
}
