//! ForgeScan Policy CTL - operator CLI for scan configurations
//!
//! Manages the NVT selection of scan configs stored in the policy database.
//! Results are printed as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use forgescan_common::logging::{init_logging_with_config, LogConfig};
use forgescan_common::Config;
use forgescan_core::ConfigId;
use forgescan_policy::{import_rules_file, load_feed_file, FamilySelection, PolicyEngine};
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, info};

/// ForgeScan scan-policy tool
#[derive(Parser, Debug)]
#[command(name = "forgescan-policyctl")]
#[command(author = "Forge Cyber Defense")]
#[command(version)]
#[command(about = "Manage NVT selection of ForgeScan scan configs", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/forgescan/policy.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides config
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact), overrides config
    #[arg(long)]
    log_format: Option<String>,

    /// Policy database path (overrides config)
    #[arg(long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a feed export into the catalog and refresh every config
    Feed {
        /// YAML/JSON feed export (defaults to catalog.feed_path)
        file: Option<PathBuf>,
    },
    /// Create an empty or full config
    Create {
        name: String,
        #[arg(long, default_value = "")]
        comment: String,
        /// Starting mode (defaults to policy.default_families_growing)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Create a config from a YAML/JSON rule document
    Import { file: PathBuf },
    /// List configs, or show one with its rules
    Show { config: Option<i64> },
    /// Show per-family state, or rewrite it with --apply
    Families {
        config: i64,
        /// Growing families with every NVT selected
        #[arg(long, value_delimiter = ',')]
        growing_all: Vec<String>,
        /// Static families with every current NVT selected
        #[arg(long, value_delimiter = ',')]
        static_all: Vec<String>,
        /// Growing families keeping their current NVT selection
        #[arg(long, value_delimiter = ',')]
        growing_rest: Vec<String>,
        /// Mode after the rewrite (defaults to the current one)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Write the selection; unlisted families become static
        #[arg(long)]
        apply: bool,
    },
    /// Show the selected NVTs of a family, or replace them with --set
    Nvts {
        config: i64,
        family: String,
        /// OIDs to select
        oids: Vec<String>,
        #[arg(long)]
        set: bool,
    },
    /// Switch a config between constraining and generating
    Switch {
        config: i64,
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Print the plugin list of a config
    Plugins { config: i64 },
    /// Copy a config under a new name
    Copy { config: i64, name: String },
    /// Delete a config that no task uses
    Delete { config: i64 },
    /// Recompute cached counts of one or all configs
    Refresh {
        config: Option<i64>,
        /// Only check that cached counts are current
        #[arg(long)]
        verify: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModeArg {
    /// Start from every NVT, narrow with excludes
    Constraining,
    /// Start from nothing, widen with includes
    Generating,
}

impl ModeArg {
    fn constraining(self) -> bool {
        self == ModeArg::Constraining
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_exists = std::path::Path::new(&args.config).exists();
    let mut config = if config_exists {
        Config::from_file(&args.config)
            .with_context(|| format!("Failed to load config {}", args.config))?
    } else {
        Config::default()
    }
    .merge_env();
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    config.validate()?;

    // Initialize logging
    init_logging_with_config(LogConfig::from_settings(&config.logging)?)?;
    if !config_exists {
        debug!("Config file {} not found, using defaults", args.config);
    }
    info!("ForgeScan policy database: {}", config.database.path);

    let engine = PolicyEngine::open(&config.database)?;

    match args.command {
        Command::Feed { file } => {
            let path = file
                .or_else(|| config.catalog.feed_path.as_ref().map(PathBuf::from))
                .context("no feed file given and catalog.feed_path is not set")?;
            let nvts = load_feed_file(&path)?;
            let written = engine.publish_nvts(&nvts)?;
            let catalog = engine.catalog()?;
            print_json(&json!({
                "written": written,
                "nvts": catalog.len(),
                "families": catalog.family_count(),
            }))?;
        }
        Command::Create { name, comment, mode } => {
            let constraining = mode
                .map(ModeArg::constraining)
                .unwrap_or(config.policy.default_families_growing);
            let created = engine.create_config(&name, &comment, constraining)?;
            print_json(&created)?;
        }
        Command::Import { file } => {
            let (created, skipped) = import_rules_file(&engine, &file)?;
            print_json(&json!({ "config": created, "skipped": skipped }))?;
        }
        Command::Show { config: None } => print_json(&engine.list_configs()?)?,
        Command::Show { config: Some(id) } => {
            let id = ConfigId(id);
            print_json(&json!({
                "config": engine.config(id)?,
                "rules": engine.rules(id)?,
                "tasks": engine.tasks_using(id)?,
            }))?;
        }
        Command::Families {
            config: id,
            growing_all,
            static_all,
            growing_rest,
            mode,
            apply,
        } => {
            let id = ConfigId(id);
            if apply {
                let current = engine.config(id)?;
                let selection = FamilySelection {
                    growing_all,
                    static_all,
                    growing_rest,
                    families_growing: mode
                        .map(ModeArg::constraining)
                        .unwrap_or(current.counts.families_growing),
                };
                print_json(&engine.set_family_selection(id, &selection)?)?;
            } else {
                print_json(&engine.family_states(id)?)?;
            }
        }
        Command::Nvts {
            config: id,
            family,
            oids,
            set,
        } => {
            let id = ConfigId(id);
            if set {
                print_json(&engine.set_nvt_selection(id, &family, &oids)?)?;
            } else {
                print_json(&engine.family_members(id, &family)?)?;
            }
        }
        Command::Switch { config: id, mode } => {
            let id = ConfigId(id);
            let switched = engine.switch_representation(id, mode.constraining())?;
            print_json(&json!({ "switched": switched, "config": engine.config(id)? }))?;
        }
        Command::Plugins { config: id } => print_json(&engine.plugin_list(ConfigId(id))?)?,
        Command::Copy { config: id, name } => print_json(&engine.copy_config(ConfigId(id), &name)?)?,
        Command::Delete { config: id } => {
            engine.delete_config(ConfigId(id))?;
            print_json(&json!({ "deleted": id }))?;
        }
        Command::Refresh {
            config: Some(id),
            verify: true,
        } => {
            engine.verify_counts(ConfigId(id))?;
            print_json(&json!({ "verified": id }))?;
        }
        Command::Refresh {
            config: None,
            verify: true,
        } => {
            let configs = engine.list_configs()?;
            for scan_config in &configs {
                engine.verify_counts(scan_config.id)?;
            }
            print_json(&json!({ "verified": configs.len() }))?;
        }
        Command::Refresh {
            config: Some(id),
            verify: false,
        } => print_json(&engine.recompute_counts(ConfigId(id))?)?,
        Command::Refresh {
            config: None,
            verify: false,
        } => {
            let changed = engine.refresh_all_counts()?;
            print_json(&json!({ "changed": changed }))?;
        }
    }

    Ok(())
}
