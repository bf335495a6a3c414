use chrono::Local;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::db::ActivitySnapshotRepository;
use crate::models::ActivitySnapshot;

use super::{parse_date_arg, OutputFormat};

#[derive(Args)]
pub struct SnapshotCommand {
    #[command(subcommand)]
    pub command: SnapshotSubcommand,
}

#[derive(Subcommand)]
pub enum SnapshotSubcommand {
    /// Record the day's activity totals (overwrites earlier totals for the day)
    Record {
        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<String>,

        /// Step count
        #[arg(long, default_value_t = 0)]
        steps: i64,

        /// Active energy in kcal
        #[arg(long, default_value_t = 0.0)]
        energy: f64,

        /// Exercise minutes
        #[arg(long, default_value_t = 0)]
        exercise: i64,

        /// Stand hours
        #[arg(long, default_value_t = 0)]
        stand: i64,
    },

    /// List recorded days, most recent first
    List {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of days to show
        #[arg(long, short)]
        limit: Option<i64>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete all activity snapshots
    Delete,
}

impl SnapshotCommand {
    pub async fn run(
        &self,
        repo: &ActivitySnapshotRepository,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            SnapshotSubcommand::Record {
                date,
                steps,
                energy,
                exercise,
                stand,
            } => {
                let snapshot_on = match date {
                    Some(d) => parse_date_arg(d)?,
                    None => Local::now().date_naive(),
                };

                let snapshot = ActivitySnapshot::new(&config.owner, snapshot_on)
                    .with_steps(*steps)
                    .with_active_energy(*energy)
                    .with_exercise_minutes(*exercise)
                    .with_stand_hours(*stand);

                let id = repo.save(&snapshot).await?;
                println!("Recorded activity for {}", snapshot_on);
                println!("Snapshot ID: {}", id);
                Ok(())
            }
            SnapshotSubcommand::List {
                from,
                to,
                limit,
                format,
            } => {
                let from = from.as_deref().map(parse_date_arg).transpose()?;
                let to = to.as_deref().map(parse_date_arg).transpose()?;

                let snapshots = repo.list(&config.owner, from, to, *limit).await?;
                if snapshots.is_empty() {
                    println!("No activity snapshots found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&snapshots)?);
                    }
                    OutputFormat::Text => {
                        for snapshot in &snapshots {
                            println!("{}", snapshot);
                        }
                        println!("\nTotal: {} day(s)", snapshots.len());
                    }
                }
                Ok(())
            }
            SnapshotSubcommand::Delete => {
                let deleted = repo.delete_all(&config.owner).await?;
                println!("Deleted {} snapshot(s)", deleted);
                Ok(())
            }
        }
    }
}
