//! opfs-sql CLI - Run SQL against a durable worker-backed database
//!
//! Usage:
//!   opfs-sql query <db> <sql> [--params <json>]
//!   opfs-sql get <db> <sql> [--params <json>]
//!   opfs-sql exec <db> <sql> [--params <json>]
//!   opfs-sql run <db> <sql> [--params <json>]
//!   opfs-sql tx <db> <statements.json>
//!
//! Examples:
//!   opfs-sql run app.db "CREATE TABLE t (x INTEGER)"
//!   opfs-sql exec app.db "INSERT INTO t (x) VALUES (?)" --params '[1]'
//!   opfs-sql query app.db "SELECT * FROM t WHERE x > :min" --params '{":min": 0}'
//!   opfs-sql tx app.db statements.json

use clap::{Parser, Subcommand};
use opfs_sql::worker::protocol::Row;
use opfs_sql::{Database, Params, Settings, Statement};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "opfs-sql")]
#[command(about = "opfs-sql - A persistent SQL database driven from a background worker")]
#[command(version)]
struct Cli {
    /// Config file (defaults to OPFS_SQL_CONFIG, ./opfs-sql.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the storage root directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a SELECT and print every row
    Query(StatementArgs),

    /// Run a SELECT and print the first row
    Get(StatementArgs),

    /// Run an INSERT, UPDATE or DELETE and print the change summary
    Exec(StatementArgs),

    /// Run any non-SELECT statement
    Run(StatementArgs),

    /// Run a JSON array of statements atomically
    Tx {
        /// Database filename inside the storage root
        db: String,

        /// JSON file of statements ("-" reads stdin)
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct StatementArgs {
    /// Database filename inside the storage root
    db: String,

    /// SQL statement
    sql: String,

    /// Bound parameters as a JSON array or object
    #[arg(short, long)]
    params: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let db_name = match &cli.command {
        Commands::Query(args)
        | Commands::Get(args)
        | Commands::Exec(args)
        | Commands::Run(args) => args.db.clone(),
        Commands::Tx { db, .. } => db.clone(),
    };

    let db = match Database::open_with_settings(&db_name, &settings).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open '{}': {}", db_name, e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run_command(&db, cli.command).await;

    if let Err(e) = db.close().await {
        eprintln!("Failed to close '{}': {}", db_name, e);
        return ExitCode::FAILURE;
    }

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(rollback) = e.suppressed() {
                eprintln!("Rollback also failed: {}", rollback);
            }
            ExitCode::FAILURE
        }
    }
}

fn load_settings(cli: &Cli) -> opfs_sql::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };
    if let Some(root) = &cli.root {
        settings.storage.root = Some(root.to_string_lossy().into_owned());
    }
    Ok(settings)
}

async fn run_command(db: &Database, command: Commands) -> opfs_sql::Result<()> {
    match command {
        Commands::Query(args) => {
            let rows: Vec<Row> = db.read_many(&args.sql, parse_params(&args)?).await?;
            print_json(&rows)
        }
        Commands::Get(args) => {
            let row: Option<Row> = db.read_one(&args.sql, parse_params(&args)?).await?;
            print_json(&row)
        }
        Commands::Exec(args) => {
            let result = db.mutate(&args.sql, parse_params(&args)?).await?;
            print_json(&result)
        }
        Commands::Run(args) => db.run(&args.sql, parse_params(&args)?).await,
        Commands::Tx { file, .. } => {
            let statements = read_statements(&file)?;
            let results = db.transaction(statements).await?;
            print_json(&results)
        }
    }
}

fn parse_params(args: &StatementArgs) -> opfs_sql::Result<Params> {
    let Some(raw) = &args.params else {
        return Ok(Params::None);
    };
    let json: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| opfs_sql::Error::Validation(format!("invalid --params JSON: {e}")))?;
    Params::from_json(&json)
}

fn read_statements(file: &PathBuf) -> opfs_sql::Result<Vec<Statement>> {
    let source = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| opfs_sql::Error::Validation(format!("cannot read stdin: {e}")))?;
        buf
    } else {
        fs::read_to_string(file).map_err(|e| {
            opfs_sql::Error::Validation(format!("cannot read '{}': {e}", file.display()))
        })?
    };

    serde_json::from_str(&source)
        .map_err(|e| opfs_sql::Error::Validation(format!("invalid statement list: {e}")))
}

fn print_json<T: Serialize>(value: &T) -> opfs_sql::Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| opfs_sql::Error::Validation(format!("cannot encode output: {e}")))?;
    println!("{}", text);
    Ok(())
}
