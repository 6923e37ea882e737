//! # Property search CLI (`nlq`)
//!
//! ## Usage
//!
//! ```bash
//! nlq --config ./config/nlq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nlq serve` | Start the HTTP API |
//! | `nlq search "<query>"` | Translate, execute, print JSON results |
//! | `nlq translate "<query>"` | Print the accepted template and parameters |
//! | `nlq parse <file>` | Inspect a saved model answer offline |
//! | `nlq check "<sql>" --params '<json>'` | Run the safety rules on a template |
//!
//! ## Examples
//!
//! ```bash
//! nlq translate "casas con piscina en zona 10 por menos de 300000"
//! nlq parse ./answer.txt --query "casas con piscina"
//! nlq check "SELECT * FROM propiedades WHERE precio < %s" --params '[300000]'
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use property_nlq::commands;
use property_nlq::config::{self, Config};
use property_nlq::logging::{init_logging, LoggingConfig};
use property_nlq::server;

/// Natural-language property search over a listings database.
#[derive(Parser)]
#[command(
    name = "nlq",
    about = "Natural-language property search: model-generated, validated, parameter-bound SQL",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// `parse` and `check` fall back to built-in defaults when the file is
    /// missing.
    #[arg(long, global = true, default_value = "./config/nlq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Translate a query, execute it and print the results as JSON.
    Search {
        query: String,
    },

    /// Translate a query and print the accepted template without executing it.
    Translate {
        query: String,
    },

    /// Extract, assemble and validate a saved model answer.
    ///
    /// Exits non-zero when the answer cannot be parsed or the template is
    /// rejected.
    Parse {
        /// File holding the raw model output.
        file: PathBuf,

        /// Original user query; prints the repair prompt for rejected templates.
        #[arg(long)]
        query: Option<String>,
    },

    /// Validate a template against a JSON array of parameters.
    Check {
        sql: String,

        /// Parameters as a JSON array, e.g. `'[300000, "zona 10"]'`.
        #[arg(long, default_value = "[]")]
        params: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Offline commands work without a config file
    let cfg = match &cli.command {
        Commands::Parse { .. } | Commands::Check { .. } if !cli.config.exists() => {
            Config::minimal()
        }
        _ => config::load_config(&cli.config)?,
    };

    init_logging(&LoggingConfig::new(&cfg.log_level))?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Search { query } => {
            commands::run_search(&cfg, &query).await?;
        }
        Commands::Translate { query } => {
            commands::run_translate(&cfg, &query).await?;
        }
        Commands::Parse { file, query } => {
            commands::run_parse(&cfg, &file, query.as_deref())?;
        }
        Commands::Check { sql, params } => {
            commands::run_check(&cfg, &sql, &params)?;
        }
    }

    Ok(())
}
