use chrono::Local;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::db::MealLogRepository;
use crate::models::{MealItem, MealLog, MealType};

use super::{parse_date_arg, OutputFormat};

#[derive(Args)]
pub struct MealCommand {
    #[command(subcommand)]
    pub command: MealSubcommand,
}

#[derive(Subcommand)]
pub enum MealSubcommand {
    /// Log a meal
    Log {
        /// Meal type (breakfast, lunch, dinner, snack)
        meal_type: String,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<String>,

        /// Item as name:quantity:unit[:calories] (can be repeated)
        #[arg(long = "item", short, value_name = "ITEM")]
        items: Vec<String>,

        /// Notes for the meal
        #[arg(long)]
        notes: Option<String>,
    },

    /// List logged meals
    List {
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

    /// Delete all meal logs
    Delete,

    /// Remove duplicate meal logs, keeping the oldest
    Dedupe,
}

fn parse_item(spec: &str) -> Result<MealItem, String> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() < 3 || parts.len() > 4 {
        return Err(format!(
            "Invalid item '{}'. Use name:quantity:unit or name:quantity:unit:calories.",
            spec
        ));
    }

    let quantity: f64 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid quantity '{}' in item '{}'", parts[1], spec))?;
    let mut item = MealItem::new(parts[0], quantity, parts[2]);
    if parts.len() == 4 {
        let calories: f64 = parts[3]
            .parse()
            .map_err(|_| format!("Invalid calories '{}' in item '{}'", parts[3], spec))?;
        item = item.with_calories(calories);
    }
    Ok(item)
}

impl MealCommand {
    pub async fn run(
        &self,
        repo: &MealLogRepository,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            MealSubcommand::Log {
                meal_type,
                date,
                items,
                notes,
            } => {
                let meal_type: MealType = meal_type.parse().map_err(|e: String| e)?;
                let logged_on = match date {
                    Some(d) => parse_date_arg(d)?,
                    None => Local::now().date_naive(),
                };

                let parsed: Result<Vec<MealItem>, String> =
                    items.iter().map(|spec| parse_item(spec)).collect();
                let mut log =
                    MealLog::new(&config.owner, meal_type, logged_on).with_items(parsed?);
                if let Some(notes) = notes {
                    log = log.with_notes(notes);
                }

                let total = log.total_calories();
                let id = repo.save(&log).await?;
                println!("Logged {} on {}", meal_type, logged_on);
                if total > 0.0 {
                    println!("Total: {:.0} kcal", total);
                }
                println!("Log ID: {}", id);
                Ok(())
            }
            MealSubcommand::List { from, to, format } => {
                let from = from.as_deref().map(parse_date_arg).transpose()?;
                let to = to.as_deref().map(parse_date_arg).transpose()?;

                let logs = repo.list(&config.owner, from, to, None).await?;
                if logs.is_empty() {
                    println!("No meals found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&logs)?);
                    }
                    OutputFormat::Text => {
                        for log in &logs {
                            println!("{}", log);
                        }
                        println!("Total: {} meal(s)", logs.len());
                    }
                }
                Ok(())
            }
            MealSubcommand::Delete => {
                let deleted = repo.delete_all(&config.owner).await?;
                println!("Deleted {} meal(s)", deleted);
                Ok(())
            }
            MealSubcommand::Dedupe => {
                let removed = repo.remove_duplicates(&config.owner).await?;
                println!("Removed {} duplicate(s)", removed);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item() {
        let item = parse_item("oats:80:g:310").unwrap();
        assert_eq!(item.name, "oats");
        assert_eq!(item.quantity, 80.0);
        assert_eq!(item.unit, "g");
        assert_eq!(item.calories, Some(310.0));

        let item = parse_item("coffee:1:cup").unwrap();
        assert!(item.calories.is_none());

        assert!(parse_item("oats").is_err());
        assert!(parse_item("oats:many:g").is_err());
    }
}
