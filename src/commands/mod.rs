mod completed;
mod config_cmd;
mod sync_cmd;
mod todo;

pub use completed::{CompletedCommand, CompletedSubcommand};
pub use config_cmd::ConfigCommand;
pub use sync_cmd::SyncCommand;
pub use todo::{TodoCommand, TodoSubcommand};

use clap::ValueEnum;
use std::io::{self, Write};

use crate::models::Todo;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Finds the todo whose id equals `identifier` or starts with it.
fn resolve_id<'t>(todos: &'t [Todo], identifier: &str) -> Result<&'t Todo, String> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err("Todo id cannot be empty".to_string());
    }
    if let Some(todo) = todos.iter().find(|t| t.id == identifier) {
        return Ok(todo);
    }

    let matches: Vec<&Todo> = todos
        .iter()
        .filter(|t| t.id.starts_with(identifier))
        .collect();
    match matches.as_slice() {
        [todo] => Ok(*todo),
        [] => Err(format!("Todo not found: {}", identifier)),
        _ => Err(format!(
            "Ambiguous id '{}' matches {} todos; use more characters",
            identifier,
            matches.len()
        )),
    }
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
