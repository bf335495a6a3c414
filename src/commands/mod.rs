use chrono::NaiveDate;
use clap::ValueEnum;

mod config_cmd;
mod meal;
mod progress;
mod snapshot;
mod sync_cmd;
mod template;
mod workout;

pub use config_cmd::ConfigCommand;
pub use meal::MealCommand;
pub use progress::ProgressCommand;
pub use snapshot::SnapshotCommand;
pub use sync_cmd::SyncCommand;
pub use template::TemplateCommand;
pub use workout::WorkoutCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub(crate) fn parse_date_arg(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date format '{}'. Use YYYY-MM-DD.", value))
}
