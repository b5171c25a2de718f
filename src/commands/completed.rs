use clap::{Args, Subcommand};

use super::{confirm, resolve_id, OutputFormat};
use crate::db::TodoRepository;
use crate::screens::CompletedScreen;

#[derive(Args)]
pub struct CompletedCommand {
    #[command(subcommand)]
    pub command: CompletedSubcommand,
}

#[derive(Subcommand)]
pub enum CompletedSubcommand {
    /// List completed todos
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change the text of a completed todo
    Edit {
        /// Todo ID (or a unique prefix)
        id: String,

        /// New text
        text: String,
    },

    /// Move a completed todo back to the active list
    MoveBack {
        /// Todo ID (or a unique prefix)
        id: String,
    },

    /// Delete a completed todo
    Delete {
        /// Todo ID (or a unique prefix)
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl CompletedCommand {
    pub fn is_write(&self) -> bool {
        !matches!(self.command, CompletedSubcommand::List { .. })
    }

    pub async fn run(&self, repo: &TodoRepository) -> Result<(), Box<dyn std::error::Error>> {
        let mut screen = CompletedScreen::new(repo);
        screen.on_focus().await;
        check(&screen)?;

        match &self.command {
            CompletedSubcommand::List { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(screen.todos())?);
                    }
                    OutputFormat::Text => {
                        print!("{}", screen.render());
                        if !screen.todos().is_empty() {
                            println!("\nTotal: {} completed", screen.todos().len());
                        }
                    }
                }
                Ok(())
            }

            CompletedSubcommand::Edit { id, text } => {
                if text.trim().is_empty() {
                    return Err("Todo text cannot be empty".into());
                }
                let id = resolve_id(screen.todos(), id)?.id.clone();
                screen.start_edit(&id);
                screen.change_edit(text);
                screen.save_edit().await;
                check(&screen)?;
                print!("{}", screen.render());
                Ok(())
            }

            CompletedSubcommand::MoveBack { id } => {
                let todo = resolve_id(screen.todos(), id)?.clone();
                screen.move_back(&todo.id).await;
                check(&screen)?;
                println!("Moved back to todos: {}", todo.text);
                Ok(())
            }

            CompletedSubcommand::Delete { id, force } => {
                let todo = resolve_id(screen.todos(), id)?.clone();
                if !force && !confirm(&format!("Delete completed todo '{}'?", todo.text))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }
                screen.delete(&todo.id).await;
                check(&screen)?;
                println!("Deleted todo: {}", todo.text);
                Ok(())
            }
        }
    }
}

fn check(screen: &CompletedScreen<'_>) -> Result<(), String> {
    match screen.last_error() {
        Some(error) => Err(error.to_string()),
        None => Ok(()),
    }
}
