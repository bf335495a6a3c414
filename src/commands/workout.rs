use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::db::WorkoutRepository;
use crate::models::WorkoutEntry;

use super::OutputFormat;

#[derive(Args)]
pub struct WorkoutCommand {
    #[command(subcommand)]
    pub command: WorkoutSubcommand,
}

#[derive(Subcommand)]
pub enum WorkoutSubcommand {
    /// Log a workout session
    Log {
        /// Activity name (running, cycling, strength, ...)
        activity: String,

        /// Duration in minutes
        duration: i64,

        /// Start time (RFC 3339, e.g. 2025-01-01T07:30:00Z), defaults to now
        #[arg(long, short)]
        started: Option<String>,

        /// Calories burned
        #[arg(long, short)]
        calories: Option<f64>,

        /// Stable id from the importing device, enables import dedup
        #[arg(long)]
        source_id: Option<String>,

        /// Free-form note
        #[arg(long)]
        note: Option<String>,
    },

    /// List workouts, most recent first
    List {
        /// Only show workouts from the last N days
        #[arg(long, short)]
        days: Option<i64>,

        /// Maximum number of workouts to show
        #[arg(long, short)]
        limit: Option<i64>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete all workouts
    Delete,

    /// Remove duplicate workouts, keeping the oldest
    Dedupe,
}

impl WorkoutCommand {
    pub async fn run(
        &self,
        repo: &WorkoutRepository,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            WorkoutSubcommand::Log {
                activity,
                duration,
                started,
                calories,
                source_id,
                note,
            } => {
                let started_at = match started {
                    Some(s) => DateTime::parse_from_rfc3339(s)
                        .map_err(|_| format!("Invalid timestamp '{}'. Use RFC 3339.", s))?
                        .with_timezone(&Utc),
                    None => Utc::now(),
                };

                let mut workout =
                    WorkoutEntry::new(&config.owner, activity, started_at, *duration);
                if let Some(calories) = calories {
                    workout = workout.with_calories(*calories);
                }
                if let Some(source_id) = source_id {
                    workout = workout.with_external_source_id(source_id);
                }
                if let Some(note) = note {
                    workout = workout.with_note(note);
                }

                let id = repo.save(&workout).await?;
                println!("Logged {} for {} min", activity, duration);
                println!("Workout ID: {}", id);
                Ok(())
            }
            WorkoutSubcommand::List {
                days,
                limit,
                format,
            } => {
                let since = days.map(|d| Utc::now() - Duration::days(d));
                let workouts = repo.list(&config.owner, since, *limit).await?;
                if workouts.is_empty() {
                    println!("No workouts found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&workouts)?);
                    }
                    OutputFormat::Text => {
                        for workout in &workouts {
                            println!("{}", workout);
                        }
                        println!("\nTotal: {} workout(s)", workouts.len());
                    }
                }
                Ok(())
            }
            WorkoutSubcommand::Delete => {
                let deleted = repo.delete_all(&config.owner).await?;
                println!("Deleted {} workout(s)", deleted);
                Ok(())
            }
            WorkoutSubcommand::Dedupe => {
                let removed = repo.remove_duplicates(&config.owner).await?;
                println!("Removed {} duplicate(s)", removed);
                Ok(())
            }
        }
    }
}
