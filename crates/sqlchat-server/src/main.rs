mod api;
mod assistant;
mod config;
mod policy;

use anyhow::Context;
use assistant::Assistant;
use clap::{Parser, Subcommand};
use config::{Config, DatabaseConfig};
use sqlchat_core::QueryResult;
use sqlchat_db::render::grid;
use sqlchat_db::{execute_batch, introspect, render_batch, Connector, MssqlConnector, SqlSession};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "sqlchat", about = "Ask questions of a SQL Server database in plain language")]
struct Cli {
    #[arg(long, default_value = "sqlchat.toml")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve,
    /// Answer one question and exit.
    Ask { question: String },
    /// Run a `;`-separated script and print every statement's outcome.
    Exec {
        #[arg(long)]
        file: PathBuf,
    },
    /// Print the schema text the model would see.
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_path(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Serve => api::serve(config).await,
        Command::Ask { question } => ask(&config, &question).await,
        Command::Exec { file } => exec(&config, &file).await,
        Command::Schema => schema(&config).await,
    }
}

fn database(config: &Config) -> anyhow::Result<&DatabaseConfig> {
    config
        .database
        .as_ref()
        .context("this command needs a [database] section")
}

async fn open_session(db: &DatabaseConfig) -> anyhow::Result<Box<dyn SqlSession>> {
    let options = db.connect_options()?;
    tracing::info!(descriptor = %options.describe(), "connecting");
    Ok(MssqlConnector.open(&options).await?)
}

async fn ask(config: &Config, question: &str) -> anyhow::Result<()> {
    let db = database(config)?;
    let generator = config.llm.build_generator()?;
    let options = db.connect_options()?;
    tracing::info!(descriptor = %options.describe(), "connecting");
    let mut assistant = Assistant::start(
        Arc::new(MssqlConnector),
        options,
        generator,
        config.policy.call_policy(),
        config.history.max_turns,
        db.target_database.clone(),
    )
    .await?;

    let outcome = assistant.ask(question).await;
    assistant.close().await?;
    let answer = outcome?;

    println!("SQL:\n{}\n", answer.sql);
    match &answer.result {
        QueryResult::Table(table) => println!("{}\n", grid(&table.columns, &table.rows)),
        QueryResult::Error(message) => println!("{message}\n"),
    }
    println!("{}", answer.explanation);
    Ok(())
}

async fn exec(config: &Config, file: &Path) -> anyhow::Result<()> {
    let script = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let policy = config.policy.call_policy();
    let mut session = open_session(database(config)?).await?;
    let results = execute_batch(session.as_mut(), &script, policy.query_timeout).await;
    session.close().await?;
    println!("{}", render_batch(&results));
    Ok(())
}

async fn schema(config: &Config) -> anyhow::Result<()> {
    let db = database(config)?;
    let mut session = open_session(db).await?;
    let snapshot = introspect(session.as_mut(), db.target_database.as_deref()).await;
    session.close().await?;
    println!("{}", snapshot.render());
    Ok(())
}
