//! persondir command-line tool.
//!
//! Assembles a resolver from a TOML configuration file and runs username
//! lookups and attribute searches against it, lists the attribute names
//! the configured sources know about, and generates / validates
//! configuration files.

mod output;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use persondir_core::config::{ResolverConfig, SAMPLE_CONFIG};
use persondir_core::query::{seed_query, Query};
use persondir_core::source::{AttributeSource, ChooseById, ChooseByTag, SourceFilter, ALWAYS};
use persondir_core::build_resolver;

use crate::style::Mark;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// persondir command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "persondir",
    version,
    about = "Resolve person attributes from configured sources"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./persondir.toml")]
    config: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Restricts which sources of the top-level resolver are consulted.
#[derive(clap::Args, Debug, Default)]
struct SourceSelection {
    /// Only consult the source with this id (repeatable).
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Only consult sources carrying this tag.
    #[arg(long, conflicts_with = "sources")]
    tag: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Look up one person by username.
    Lookup {
        /// Username to resolve.
        uid: String,

        /// Extra query attribute as name=value (repeatable).
        #[arg(long = "attr", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        selection: SourceSelection,
    },

    /// Find every person matching an attribute query.
    Search {
        /// Query attribute as name=value (repeatable; repeated names add values).
        #[arg(long = "attr", value_parser = parse_attribute, required = true)]
        attributes: Vec<(String, String)>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        selection: SourceSelection,
    },

    /// List the query and result attribute names the sources report.
    Attributes {
        /// Print JSON instead of plain text.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        selection: SourceSelection,
    },

    /// Generate a starting configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./persondir.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file and assemble its resolver.
    Validate,
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Minimal logging for CLI
    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Lookup {
            uid,
            attributes,
            json,
            selection,
        } => {
            let (config, resolver) = load_resolver(&cli.config)?;
            cmd_lookup(&config, resolver.as_ref(), &uid, attributes, json, &selection)
        }
        Commands::Search {
            attributes,
            json,
            selection,
        } => {
            let (_, resolver) = load_resolver(&cli.config)?;
            cmd_search(resolver.as_ref(), attributes, json, &selection)
        }
        Commands::Attributes { json, selection } => {
            let (_, resolver) = load_resolver(&cli.config)?;
            cmd_attributes(resolver.as_ref(), json, &selection)
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_resolver(path: &Path) -> Result<(ResolverConfig, Arc<dyn AttributeSource>)> {
    let config =
        ResolverConfig::load_and_validate(path).context("failed to load configuration file")?;
    let resolver = build_resolver(&config).context("failed to assemble resolver")?;
    debug!(resolver = resolver.id(), "resolver ready");
    Ok((config, resolver))
}

fn source_filter(selection: &SourceSelection) -> Box<dyn SourceFilter> {
    if let Some(tag) = &selection.tag {
        Box::new(ChooseByTag::new(tag.clone()))
    } else if !selection.sources.is_empty() {
        Box::new(ChooseById::new(selection.sources.iter().cloned()))
    } else {
        Box::new(ALWAYS)
    }
}

/// Append `name=value` pairs to `query`; repeated names collect values.
fn extend_query(query: &mut Query, attributes: Vec<(String, String)>) {
    for (name, value) in attributes {
        query
            .entry(name)
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(Value::String(value));
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_lookup(
    config: &ResolverConfig,
    resolver: &dyn AttributeSource,
    uid: &str,
    attributes: Vec<(String, String)>,
    json: bool,
    selection: &SourceSelection,
) -> Result<()> {
    let mut query = seed_query(&config.resolver.username_attribute, uid);
    extend_query(&mut query, attributes);

    let filter = source_filter(selection);
    let person = resolver
        .resolve_one(&query, filter.as_ref())
        .with_context(|| format!("lookup of '{uid}' failed"))?;

    match person {
        Some(person) if json => output::print_json(&person),
        Some(person) => {
            output::print_person(&person);
            Ok(())
        }
        None if json => output::print_json(&Value::Null),
        None => {
            println!(
                "{}",
                style::marked(Mark::Warn, &format!("No person found for '{uid}'."))
            );
            Ok(())
        }
    }
}

fn cmd_search(
    resolver: &dyn AttributeSource,
    attributes: Vec<(String, String)>,
    json: bool,
    selection: &SourceSelection,
) -> Result<()> {
    let mut query = Query::new();
    extend_query(&mut query, attributes);

    let filter = source_filter(selection);
    let people = resolver
        .resolve_many(&query, filter.as_ref())
        .context("search failed")?;

    if json {
        return output::print_json(&people);
    }

    match people {
        None => println!(
            "{}",
            style::marked(Mark::Warn, "No source could evaluate this query.")
        ),
        Some(people) if people.is_empty() => println!("No matches."),
        Some(people) => output::print_people(&people),
    }
    Ok(())
}

fn cmd_attributes(
    resolver: &dyn AttributeSource,
    json: bool,
    selection: &SourceSelection,
) -> Result<()> {
    let filter = source_filter(selection);
    let query_names = resolver.available_query_attributes(filter.as_ref());
    let result_names = resolver.possible_result_attribute_names(filter.as_ref());

    if json {
        return output::print_json(&serde_json::json!({
            "query_attributes": query_names,
            "result_attributes": result_names,
        }));
    }

    output::print_names("Query attributes:", query_names.as_ref());
    println!();
    output::print_names("Result attributes:", result_names.as_ref());
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, SAMPLE_CONFIG).context("failed to write config file")?;

    println!(
        "{}",
        style::marked(
            Mark::Ok,
            &format!("Default configuration written to {}", output.display())
        )
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the [[sources]] entries to describe your directories");
    println!(
        "  2. Validate with: persondir validate --config {}",
        output.display()
    );
    println!(
        "  3. Try a lookup: persondir lookup <uid> --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config =
        ResolverConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  {}", style::marked(Mark::Ok, "TOML structure is valid"));

    if let Err(e) = config.validate() {
        println!("  {}", style::marked(Mark::Fail, &format!("Validation error: {e}")));
        anyhow::bail!("configuration validation failed");
    }
    println!("  {}", style::marked(Mark::Ok, "All required fields are valid"));

    if let Err(e) = build_resolver(&config) {
        println!("  {}", style::marked(Mark::Fail, &format!("Assembly error: {e}")));
        anyhow::bail!("configuration validation failed");
    }
    println!("  {}", style::marked(Mark::Ok, "Resolver assembled"));

    // Summary
    let section = &config.resolver;
    println!();
    println!("{}", style::header("Configuration summary:"));
    println!("  Resolver id   : {}", section.id);
    println!("  Kind          : {:?}", section.kind);
    println!("  Merger        : {}", section.effective_merger());
    println!("  Username attr : {}", section.username_attribute);
    println!(
        "  Cache         : {}",
        if config.cache.enabled { "enabled" } else { "disabled" }
    );
    println!("  Sources       : {}", config.sources.len());
    for source in &config.sources {
        let kind = format!("{:?}", source.kind);
        println!("    - {}", style::source_line(&source.id, &kind, &source.tags));
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}
