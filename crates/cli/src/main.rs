use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use storage::{
    Database,
    dto::{
        common::PaginationParams,
        racer::{PageRequest, parse_sort},
    },
    repository::RacerRepository,
    store::{DocumentStore, MemoryStore},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "raceday")]
#[command(about = "Raceday racer administration", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Run against a throwaway in-memory store instead of Postgres
    #[arg(long, global = true)]
    memory: bool,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// List racers one page at a time, filtered by FIELD=VALUE pairs
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long)]
        per_page: Option<u32>,

        /// e.g. "number:desc,last_name"
        #[arg(long)]
        sort: Option<String>,

        #[arg(long)]
        json: bool,

        filters: Vec<String>,
    },
    Show {
        id: String,

        #[arg(long)]
        json: bool,
    },
    /// Create a racer from FIELD=VALUE pairs and print its id
    Add {
        #[arg(required = true)]
        fields: Vec<String>,
    },
    Update {
        id: String,

        #[arg(required = true)]
        fields: Vec<String>,
    },
    Remove {
        id: String,
    },
    /// Save every racer from a JSON array file
    Import {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("raceday={},storage={}", log_level, log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    if cli.memory {
        tracing::info!("Using in-memory store; nothing will be persisted");
        if matches!(cli.command, Commands::Migrate) {
            tracing::info!("In-memory store needs no migrations");
            return Ok(());
        }
        return execute(&MemoryStore::new(), &config, cli.command).await;
    }

    let database_url = config.database_url()?;
    tracing::info!(
        "Connecting to database at: {}",
        database_url.split('@').next_back().unwrap_or("unknown")
    );
    let db = Database::new(database_url, config.max_connections)
        .await
        .context("Failed to initialize database")?;

    let result = match cli.command {
        Commands::Migrate => {
            tracing::info!("Running database migrations");
            db.run_migrations()
                .await
                .context("Failed to run migrations")
                .map(|_| tracing::info!("Database migrations completed successfully"))
        }
        command => execute(&db.documents(), &config, command).await,
    };

    db.close().await;

    result
}

async fn execute<S: DocumentStore + ?Sized>(
    store: &S,
    config: &Config,
    command: Commands,
) -> anyhow::Result<()> {
    let repo = RacerRepository::new(store);

    match command {
        Commands::Migrate => Ok(()),
        Commands::List {
            page,
            per_page,
            sort,
            json,
            filters,
        } => {
            let pagination = PaginationParams::new(page, per_page.unwrap_or(config.per_page));
            let request = PageRequest::new(pagination)
                .with_filter(commands::parse_fields(&filters)?)
                .with_sort(parse_sort(sort.as_deref().unwrap_or_default())?);

            commands::list(&repo, &request, json).await
        }
        Commands::Show { id, json } => commands::show(&repo, &id, json).await,
        Commands::Add { fields } => commands::add(&repo, &fields).await,
        Commands::Update { id, fields } => commands::update(&repo, &id, &fields).await,
        Commands::Remove { id } => commands::remove(&repo, &id).await,
        Commands::Import { file } => {
            let count = commands::import(&repo, &file).await?;
            println!("{}", count);
            Ok(())
        }
    }
}
