use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use std::path::PathBuf;

mod commands;
mod config;
mod db;
mod models;
mod sync;

use commands::{
    ConfigCommand, MealCommand, ProgressCommand, SnapshotCommand, SyncCommand, TemplateCommand,
    WorkoutCommand,
};
use config::Config;
use db::{
    init_db, ActivitySnapshotRepository, MealLogRepository, ProfileRepository,
    ProgressEntryRepository, WorkoutRepository, WorkoutTemplateRepository,
};
use sync::ChangeNotifier;

#[derive(Parser)]
#[command(name = "lume")]
#[command(version)]
#[command(about = "Local-first health tracking with background sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log and review progress measurements
    Progress(ProgressCommand),

    /// Log and review workouts
    Workout(WorkoutCommand),

    /// Log and review meals
    Meal(MealCommand),

    /// Record daily activity totals
    Snapshot(SnapshotCommand),

    /// Manage workout templates
    Template(TemplateCommand),

    /// Push local changes to the backend
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn open_db(config: &Config) -> Result<SqlitePool, Box<dyn std::error::Error>> {
    let pool = init_db(Some(config.database_path.clone())).await?;
    ProfileRepository::new(pool.clone())
        .ensure(&config.owner, &config.owner)
        .await?;
    Ok(pool)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Progress(cmd)) => {
            let pool = open_db(&config).await?;
            let repo = ProgressEntryRepository::new(pool, ChangeNotifier::new());
            cmd.run(&repo, &config).await?;
        }
        Some(Commands::Workout(cmd)) => {
            let pool = open_db(&config).await?;
            let repo = WorkoutRepository::new(pool, ChangeNotifier::new());
            cmd.run(&repo, &config).await?;
        }
        Some(Commands::Meal(cmd)) => {
            let pool = open_db(&config).await?;
            let repo = MealLogRepository::new(pool, ChangeNotifier::new());
            cmd.run(&repo, &config).await?;
        }
        Some(Commands::Snapshot(cmd)) => {
            let pool = open_db(&config).await?;
            let repo = ActivitySnapshotRepository::new(pool, ChangeNotifier::new());
            cmd.run(&repo, &config).await?;
        }
        Some(Commands::Template(cmd)) => {
            let pool = open_db(&config).await?;
            let repo = WorkoutTemplateRepository::new(pool, ChangeNotifier::new());
            cmd.run(&repo, &config).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let pool = open_db(&config).await?;
            cmd.run(&pool, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
