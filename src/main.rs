// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rankscraper::{
    pipeline::Pipeline,
    query::run_query,
    sink::SqliteStore,
    FileProgressLog, Overrides, PipelineConfig, QueryResult,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rankscraper")]
#[command(author, version, about = "Scrape a ranked HTML table into CSV and SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, transform, load and run the verification query
    Run {
        /// YAML run configuration; built-in defaults when absent
        #[arg(short, long, env = "RANKSCRAPER_CONFIG")]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: OverrideArgs,

        /// Print the query result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a read-only query against an existing database
    Query {
        /// SQLite database file
        #[arg(long)]
        db: PathBuf,

        /// Progress log to append to
        #[arg(long, default_value = "code_log.txt")]
        log: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        sql: String,
    },
}

#[derive(Args, Debug)]
struct OverrideArgs {
    /// Page to scrape
    #[arg(long, conflicts_with = "file")]
    url: Option<String>,

    /// Saved HTML page to read instead of fetching
    #[arg(long)]
    file: Option<PathBuf>,

    #[arg(long)]
    table_name: Option<String>,

    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(long)]
    csv_path: Option<PathBuf>,

    /// Rate file with `unit_code,factor` columns
    #[arg(long)]
    rates_path: Option<PathBuf>,

    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Verification query; `{table}` expands to the table name
    #[arg(long)]
    query: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl From<OverrideArgs> for Overrides {
    fn from(a: OverrideArgs) -> Self {
        Overrides {
            url: a.url,
            file: a.file,
            table_name: a.table_name,
            db_path: a.db_path,
            csv_path: a.csv_path,
            rates_path: a.rates_path,
            log_path: a.log_path,
            query: a.query,
            timeout_secs: a.timeout_secs,
        }
    }
}

fn print_result(result: &QueryResult, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).context("serializing query result")?
        );
    } else {
        println!("{result}");
    }
    Ok(())
}

fn main() -> Result<()> {
    // 1) init logging
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            overrides,
            json,
        } => {
            // 2) config file, then flags on top
            let mut cfg = match &config {
                Some(path) => PipelineConfig::from_yaml_file(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => PipelineConfig::default(),
            };
            cfg.apply(overrides.into());

            // 3) run
            let log = FileProgressLog::new(&cfg.log_path);
            let mut pipeline = Pipeline::new(cfg, &log).context("invalid run configuration")?;
            let report = pipeline
                .run()
                .with_context(|| format!("pipeline {}", pipeline.state()))?;
            info!(
                extracted = report.extracted_rows,
                stored = report.table.len(),
                matched = report.query.len(),
                "run finished"
            );

            println!("{}", pipeline.config().resolved_query());
            print_result(&report.query, json)?;
        }
        Command::Query { db, log, json, sql } => {
            if !db.exists() {
                bail!("database {} does not exist", db.display());
            }
            let log = FileProgressLog::new(log);
            let store = SqliteStore::open(&db)
                .with_context(|| format!("opening {}", db.display()))?;
            let result = run_query(&sql, &store, &log).context("query failed")?;
            store.close().context("closing database")?;
            print_result(&result, json)?;
        }
    }
    Ok(())
}
