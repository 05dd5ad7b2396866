//! Property Mapper CLI
//!
//! Loads schema documents and maps JSON records onto them.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use property_mapper::{KindRegistry, MapperConfig, MapperGraph, RawOptions};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "property-mapper")]
#[command(about = "Map JSON records onto schema-defined kinds")]
struct Cli {
    /// Config file (defaults to mapper.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    /// Schema files or directories (overrides [schemas] paths)
    #[arg(short, long)]
    schemas: Vec<PathBuf>,

    /// Compact JSON output
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every schema document and list the kinds
    Check,

    /// Construct a record as a kind and print it back
    Parse {
        /// Kind name
        #[arg(short, long)]
        kind: String,
        /// JSON record file
        file: PathBuf,
        /// Keep undeclared keys in the output
        #[arg(long)]
        include_unknown: bool,
    },

    /// Construct a base record, then merge updates onto it in order
    Merge {
        /// Kind name
        #[arg(short, long)]
        kind: String,
        /// JSON record to start from
        base: PathBuf,
        /// JSON records merged in order
        #[arg(required = true)]
        updates: Vec<PathBuf>,
        /// Reject undeclared keys in updates
        #[arg(long)]
        validate: bool,
    },

    /// List the kinds a record can be constructed as
    Identify {
        /// JSON record file
        file: PathBuf,
    },

    /// Fuzzy search kind names
    Search {
        query: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = MapperConfig::load_from(cli.config.as_deref())?;
    if cli.compact {
        config.output.format = property_mapper::OutputFormat::Compact;
    }
    // configured locations are optional, explicit ones are not
    let paths = if cli.schemas.is_empty() {
        config
            .schema_paths()
            .into_iter()
            .filter(|p| p.exists())
            .collect()
    } else {
        cli.schemas.clone()
    };

    let mut registry = KindRegistry::with_defaults(config.mapper.kind_options());
    let loaded = registry.load_paths(&paths)?;
    info!(kinds = loaded.len(), "schemas loaded");

    match cli.command {
        Commands::Check => {
            println!("✅ {} kinds compiled", registry.len());
            for kind in registry.kinds() {
                let options = kind.options();
                let mut notes = Vec::new();
                if let Some(key) = &options.key_field {
                    notes.push(format!("key={}", key));
                }
                if options.allow_unknown {
                    notes.push("allow_unknown".to_string());
                }
                if options.strict_check {
                    notes.push("strict".to_string());
                }
                println!("  {} {}", kind.name(), notes.join(" "));
                for (field, shape) in kind.table() {
                    println!("    {}: {:?}", field, shape);
                }
            }
            Ok(())
        }

        Commands::Parse {
            kind,
            file,
            include_unknown,
        } => {
            let kind = registry.get(&kind)?.clone();
            let raw = read_record(&file)?;
            let (graph, root) = MapperGraph::from_raw(&kind, &raw)?;
            let options = RawOptions {
                include_unknown: include_unknown || config.output.include_unknown,
                only: None,
            };
            println!("{}", config.output.format.render(&graph.to_raw_with(root, &options)?)?);
            Ok(())
        }

        Commands::Merge {
            kind,
            base,
            updates,
            validate,
        } => {
            let kind = registry.get(&kind)?.clone();
            let (mut graph, root) = MapperGraph::from_raw(&kind, &read_record(&base)?)?;
            for update in &updates {
                graph.merge_with(root, &read_record(update)?, validate)?;
                let status = if graph.is_changed(root)? { "changed" } else { "unchanged" };
                eprintln!("  {} {}", update.display(), status);
            }
            let options = RawOptions {
                include_unknown: config.output.include_unknown,
                only: None,
            };
            println!("{}", config.output.format.render(&graph.to_raw_with(root, &options)?)?);
            Ok(())
        }

        Commands::Identify { file } => {
            let raw = read_record(&file)?;
            let matches = registry.identify(&raw);
            if matches.is_empty() {
                println!("❌ No kind accepts {}", file.display());
                std::process::exit(1);
            }
            for name in matches {
                println!("{}", name);
            }
            Ok(())
        }

        Commands::Search { query, limit } => {
            for hit in registry.search(&query, limit) {
                println!("{:>5}  {}", hit.score, hit.name);
            }
            Ok(())
        }
    }
}

fn read_record(path: &Path) -> anyhow::Result<Value> {
    let text = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Failed to parse JSON in {}: {}", path.display(), e))
}
