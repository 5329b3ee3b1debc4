//! Standalone migration runner (spec.md §9 ambient tooling), grounded on
//! the teacher's `bin/migrate_cli.rs`: a small clap CLI that prints a JSON
//! result line so it can be driven by a wrapping dev script.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use dispatcher_core::config::{Config, DbKind};
use dispatcher_core::repository::{postgres::PostgresRepository, sqlite::SqliteRepository, Repository};

#[derive(Parser)]
#[command(name = "migrate_cli")]
#[command(about = "Run dispatcher database migrations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations to the configured backend.
    Run,
}

#[derive(Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn output(resp: Response) {
    println!("{}", serde_json::to_string(&resp).unwrap());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let repo: Box<dyn Repository> = match config.db.kind {
        DbKind::Sqlite => Box::new(SqliteRepository::connect(&config.db.connection_url()).await?),
        DbKind::Postgresql => Box::new(PostgresRepository::connect(&config.db.connection_url()).await?),
        DbKind::Mysql => {
            output(Response {
                success: false,
                message: Some("DB_TYPE=mysql has no repository adapter yet".to_string()),
            });
            return Ok(());
        }
    };

    match cli.command {
        Commands::Run => match repo.migrate().await {
            Ok(()) => output(Response {
                success: true,
                message: Some("migrations applied".to_string()),
            }),
            Err(e) => output(Response {
                success: false,
                message: Some(e.to_string()),
            }),
        },
    }

    Ok(())
}
