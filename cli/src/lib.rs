//! Command-line front end for the vetting engine.
//!
//! ## Commands
//!
//! - `vetting page <PAGE>` - Load a page and list its rows
//! - `vetting refresh <ROW> --hash <HASH>` - Fetch one row
//! - `vetting vote <ROW> --hash <HASH> --value <VALUE>` - Vote and wait for the result
//! - `vetting watch <PAGE>` - Load a page, poll status, and stream engine events
//!
//! ## Exit Codes
//!
//! - 0: Success
//! - 1: The server declined the vote or a row failed to load
//! - 2: Configuration error
//! - 3: Server unreachable or disconnected

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;
use vetting_core::ConfigLoader;
use vetting_core::EngineConfig;
use vetting_core::EngineError;
use vetting_core::VettingEngine;
use vetting_core::config_loader::validate;
use vetting_core::error::ErrorCategory;

pub mod page_cmd;
pub mod vote_cmd;
pub mod watch_cmd;

pub use page_cmd::PageArgs;
pub use page_cmd::RefreshArgs;
pub use vote_cmd::VoteArgs;
pub use watch_cmd::WatchArgs;

/// Exit codes shared by every subcommand
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const REJECTED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const UNAVAILABLE: i32 = 3;
}

/// Vetting client: submit votes and inspect rows from the command line
#[derive(Debug, Parser)]
#[command(name = "vetting", version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load a page and list its rows
    Page(PageArgs),

    /// Fetch the latest data for one row
    Refresh(RefreshArgs),

    /// Vote on a row and wait until the vote is resolved
    ///
    /// The row is fetched first so the vote is made against current data.
    Vote(VoteArgs),

    /// Load a page and stream engine events until interrupted
    ///
    /// Polls the server status on the configured interval and reloads the
    /// page when the locale changes on the server.
    Watch(WatchArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Directory holding config.toml (default: $VETTING_HOME or ~/.vetting)
    #[arg(long = "config-home", value_name = "DIR", global = true)]
    pub config_home: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Override the locale to vet
    #[arg(long, value_name = "LOCALE", global = true)]
    pub locale: Option<String>,

    /// Session id sent with every request
    #[arg(long, value_name = "ID", global = true)]
    pub session: Option<String>,

    /// Output as JSON for automation
    #[arg(long, global = true)]
    pub json: bool,
}

impl GlobalArgs {
    /// Layered config with command-line overrides applied last.
    pub fn load_config(&self) -> anyhow::Result<EngineConfig> {
        let mut loader = ConfigLoader::new();
        if let Some(home) = &self.config_home {
            loader = loader.with_vetting_home(home.clone());
        }
        let mut config = loader.load().context("failed to load configuration")?;
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(locale) = &self.locale {
            config.locale = locale.clone();
        }
        if let Some(session) = &self.session {
            config.session_id = Some(session.clone());
        }
        validate(&config).context("invalid command-line override")?;
        Ok(config)
    }
}

impl Cli {
    pub async fn run(self) -> i32 {
        let Cli { global, command } = self;
        let engine = match global
            .load_config()
            .and_then(|config| VettingEngine::connect(config).map_err(anyhow::Error::from))
        {
            Ok(engine) => engine,
            Err(err) => {
                print_error(global.json, "config", &format!("{err:#}"));
                return exit_codes::CONFIG_ERROR;
            }
        };

        match command {
            Command::Page(args) => page_cmd::run_page(&engine, args, global.json).await,
            Command::Refresh(args) => page_cmd::run_refresh(&engine, args, global.json).await,
            Command::Vote(args) => vote_cmd::run_vote(&engine, args, global.json).await,
            Command::Watch(args) => watch_cmd::run_watch(&engine, args, global.json).await,
        }
    }
}

/// Log to stderr so stdout stays clean for `--json`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Exit code for an engine error.
pub fn exit_code_for(err: &EngineError) -> i32 {
    match err.category() {
        ErrorCategory::Transport | ErrorCategory::Disconnected => exit_codes::UNAVAILABLE,
        ErrorCategory::Policy | ErrorCategory::Validation | ErrorCategory::Consistency => {
            exit_codes::REJECTED
        }
    }
}

pub(crate) fn print_engine_error(json: bool, err: &EngineError) {
    print_error(json, err.category().as_str(), &err.to_string());
}

pub(crate) fn print_error(json: bool, category: &str, message: &str) {
    if json {
        let value = serde_json::json!({ "error": message, "category": category });
        println!("{value}");
    } else {
        eprintln!("Error ({category}): {message}");
    }
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
