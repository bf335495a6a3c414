use chrono::{Local, NaiveTime};
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::db::{ProgressEntryRepository, ProgressFilter};
use crate::models::{ProgressEntry, ProgressMetric, SyncStatus};

use super::{parse_date_arg, OutputFormat};

#[derive(Args)]
pub struct ProgressCommand {
    #[command(subcommand)]
    pub command: ProgressSubcommand,
}

#[derive(Subcommand)]
pub enum ProgressSubcommand {
    /// Log a progress measurement
    Log {
        /// Metric (weight, body_fat, waist_circumference, resting_heart_rate, sleep_hours)
        metric: String,

        /// Measured value
        quantity: f64,

        /// Unit, defaults to the metric's standard unit
        #[arg(long, short)]
        unit: Option<String>,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<String>,

        /// Time of day (HH:MM)
        #[arg(long, short)]
        time: Option<String>,

        /// Free-form note
        #[arg(long)]
        note: Option<String>,
    },

    /// List logged measurements
    List {
        /// Filter by metric
        #[arg(long, short)]
        metric: Option<String>,

        /// Filter by sync status (pending, syncing, synced, failed)
        #[arg(long, short)]
        status: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete all measurements, optionally for one metric
    Delete {
        /// Only delete this metric
        #[arg(long, short)]
        metric: Option<String>,
    },

    /// Remove duplicate measurements, keeping the oldest
    Dedupe,
}

impl ProgressCommand {
    pub async fn run(
        &self,
        repo: &ProgressEntryRepository,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ProgressSubcommand::Log {
                metric,
                quantity,
                unit,
                date,
                time,
                note,
            } => {
                let metric: ProgressMetric = metric.parse().map_err(|e: String| e)?;
                let recorded_on = match date {
                    Some(d) => parse_date_arg(d)?,
                    None => Local::now().date_naive(),
                };

                let mut entry = ProgressEntry::new(&config.owner, metric, *quantity, recorded_on);
                if let Some(unit) = unit {
                    entry = entry.with_unit(unit);
                }
                if let Some(time) = time {
                    let parsed = NaiveTime::parse_from_str(time, "%H:%M")
                        .map_err(|_| format!("Invalid time format '{}'. Use HH:MM.", time))?;
                    entry = entry.with_time(parsed);
                }
                if let Some(note) = note {
                    entry = entry.with_note(note);
                }

                let id = repo.save(&entry).await?;
                println!("Logged {} {} {} on {}", metric, quantity, entry.unit, recorded_on);
                println!("Entry ID: {}", id);
                Ok(())
            }
            ProgressSubcommand::List {
                metric,
                status,
                from,
                to,
                format,
            } => {
                let filter = ProgressFilter {
                    metric: metric
                        .as_deref()
                        .map(|m| m.parse::<ProgressMetric>())
                        .transpose()
                        .map_err(|e: String| e)?,
                    status: status
                        .as_deref()
                        .map(|s| s.parse::<SyncStatus>())
                        .transpose()
                        .map_err(|e: String| e)?,
                    from: from.as_deref().map(parse_date_arg).transpose()?,
                    to: to.as_deref().map(parse_date_arg).transpose()?,
                };

                let entries = repo.list(&config.owner, &filter, None).await?;
                if entries.is_empty() {
                    println!("No progress entries found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => {
                        for entry in &entries {
                            println!("{}", entry);
                        }
                        println!("\nTotal: {} entr(ies)", entries.len());
                    }
                }
                Ok(())
            }
            ProgressSubcommand::Delete { metric } => {
                let metric = metric
                    .as_deref()
                    .map(|m| m.parse::<ProgressMetric>())
                    .transpose()
                    .map_err(|e: String| e)?;
                let deleted = repo.delete_all(&config.owner, metric).await?;
                println!("Deleted {} entr(ies)", deleted);
                Ok(())
            }
            ProgressSubcommand::Dedupe => {
                let removed = repo.remove_duplicates(&config.owner).await?;
                println!("Removed {} duplicate(s)", removed);
                Ok(())
            }
        }
    }
}
