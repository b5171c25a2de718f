use clap::{Args, Subcommand};

use super::{confirm, resolve_id, OutputFormat};
use crate::db::TodoRepository;
use crate::screens::ActiveScreen;

#[derive(Args)]
pub struct TodoCommand {
    #[command(subcommand)]
    pub command: TodoSubcommand,
}

#[derive(Subcommand)]
pub enum TodoSubcommand {
    /// Add a new todo
    Add {
        /// What needs doing
        text: String,
    },

    /// List active todos
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change the text of an active todo
    Edit {
        /// Todo ID (or a unique prefix)
        id: String,

        /// New text
        text: String,
    },

    /// Mark a todo as completed
    Complete {
        /// Todo ID (or a unique prefix)
        id: String,
    },

    /// Delete an active todo
    Delete {
        /// Todo ID (or a unique prefix)
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl TodoCommand {
    /// True for subcommands that change the store.
    pub fn is_write(&self) -> bool {
        !matches!(self.command, TodoSubcommand::List { .. })
    }

    pub async fn run(&self, repo: &TodoRepository) -> Result<(), Box<dyn std::error::Error>> {
        let mut screen = ActiveScreen::new(repo);
        screen.on_focus().await;

        match &self.command {
            TodoSubcommand::Add { text } => {
                if text.trim().is_empty() {
                    return Err("Todo text cannot be empty".into());
                }
                screen.set_input(text);
                screen.submit().await;
                check(&screen)?;
                print!("{}", screen.render());
                Ok(())
            }

            TodoSubcommand::List { format } => {
                check(&screen)?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(screen.todos())?);
                    }
                    OutputFormat::Text => {
                        print!("{}", screen.render());
                        if !screen.todos().is_empty() {
                            println!("\nTotal: {} todo(s)", screen.todos().len());
                        }
                    }
                }
                Ok(())
            }

            TodoSubcommand::Edit { id, text } => {
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

            TodoSubcommand::Complete { id } => {
                let todo = resolve_id(screen.todos(), id)?.clone();
                screen.complete(&todo.id).await;
                check(&screen)?;
                println!("Completed: {}", todo.text);
                Ok(())
            }

            TodoSubcommand::Delete { id, force } => {
                let todo = resolve_id(screen.todos(), id)?.clone();
                if !force && !confirm(&format!("Delete todo '{}'?", todo.text))? {
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

fn check(screen: &ActiveScreen<'_>) -> Result<(), String> {
    match screen.last_error() {
        Some(error) => Err(error.to_string()),
        None => Ok(()),
    }
}
