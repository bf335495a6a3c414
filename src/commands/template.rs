use clap::{Args, Subcommand};

use crate::config::Config;
use crate::db::WorkoutTemplateRepository;
use crate::models::{TemplateExercise, WorkoutTemplate};

use super::OutputFormat;

#[derive(Args)]
pub struct TemplateCommand {
    #[command(subcommand)]
    pub command: TemplateSubcommand,
}

#[derive(Subcommand)]
pub enum TemplateSubcommand {
    /// Create or replace a workout template
    Save {
        /// Template name (case-insensitive)
        name: String,

        /// Exercise as name:sets:reps, in order (can be repeated)
        #[arg(long = "exercise", short, value_name = "EXERCISE")]
        exercises: Vec<String>,

        /// Notes for the template
        #[arg(long)]
        notes: Option<String>,
    },

    /// Show one template by name
    Show {
        /// Template name
        name: String,
    },

    /// List all templates
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete all templates
    Delete,

    /// Remove duplicate templates, keeping the oldest
    Dedupe,
}

fn parse_exercise(spec: &str, position: i64) -> Result<TemplateExercise, String> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("Invalid exercise '{}'. Use name:sets:reps.", spec));
    }
    let sets: i64 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid sets '{}' in exercise '{}'", parts[1], spec))?;
    let reps: i64 = parts[2]
        .parse()
        .map_err(|_| format!("Invalid reps '{}' in exercise '{}'", parts[2], spec))?;
    Ok(TemplateExercise::new(parts[0], sets, reps, position))
}

impl TemplateCommand {
    pub async fn run(
        &self,
        repo: &WorkoutTemplateRepository,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            TemplateSubcommand::Save {
                name,
                exercises,
                notes,
            } => {
                let parsed: Result<Vec<TemplateExercise>, String> = exercises
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| parse_exercise(spec, i as i64 + 1))
                    .collect();

                let mut template =
                    WorkoutTemplate::new(&config.owner, name).with_exercises(parsed?);
                if let Some(notes) = notes {
                    template = template.with_notes(notes);
                }

                let id = repo.save(&template).await?;
                println!("Saved template '{}'", name);
                println!("Template ID: {}", id);
                Ok(())
            }
            TemplateSubcommand::Show { name } => {
                match repo.get_by_name(&config.owner, name).await? {
                    Some(template) => print!("{}", template),
                    None => println!("Template not found: {}", name),
                }
                Ok(())
            }
            TemplateSubcommand::List { format } => {
                let templates = repo.list(&config.owner).await?;
                if templates.is_empty() {
                    println!("No templates found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&templates)?);
                    }
                    OutputFormat::Text => {
                        for template in &templates {
                            print!("{}", template);
                        }
                        println!("Total: {} template(s)", templates.len());
                    }
                }
                Ok(())
            }
            TemplateSubcommand::Delete => {
                let deleted = repo.delete_all(&config.owner).await?;
                println!("Deleted {} template(s)", deleted);
                Ok(())
            }
            TemplateSubcommand::Dedupe => {
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
    fn test_parse_exercise() {
        let exercise = parse_exercise("bench press:3:5", 1).unwrap();
        assert_eq!(exercise.name, "bench press");
        assert_eq!(exercise.sets, 3);
        assert_eq!(exercise.reps, 5);
        assert_eq!(exercise.position, 1);

        assert!(parse_exercise("bench press", 1).is_err());
        assert!(parse_exercise("bench:three:5", 1).is_err());
    }
}
