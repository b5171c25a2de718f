//! View models for the two todo lists.
//!
//! A screen holds what is on display and turns user actions into repository
//! calls. After every mutation the whole list is fetched again. Failures
//! never escape a screen: they are logged and kept in `last_error`, and a
//! failed fetch leaves the list empty.

mod active;
mod completed;

pub use active::ActiveScreen;
pub use completed::CompletedScreen;

use std::fmt::Write;

use crate::db::{StoreError, TodoRepository};
use crate::models::{Todo, TodoUpdate};

/// The todo currently being edited and the text typed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditState {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Active,
    Completed,
}

/// State and behavior shared by both screens.
#[derive(Debug)]
struct ListView<'a> {
    repo: &'a TodoRepository,
    view: View,
    todos: Vec<Todo>,
    editing: Option<EditState>,
    loading: bool,
    last_error: Option<String>,
}

impl<'a> ListView<'a> {
    fn new(repo: &'a TodoRepository, view: View) -> Self {
        Self {
            repo,
            view,
            todos: Vec::new(),
            editing: None,
            loading: false,
            last_error: None,
        }
    }

    async fn refresh(&mut self) {
        self.loading = true;
        let result = match self.view {
            View::Active => self.repo.get_active().await,
            View::Completed => self.repo.get_completed().await,
        };
        match result {
            Ok(todos) => self.todos = todos,
            Err(e) => {
                self.todos.clear();
                self.fail("load todos", e);
            }
        }
        self.loading = false;
    }

    fn start_edit(&mut self, id: &str) {
        self.last_error = None;
        match self.todos.iter().find(|todo| todo.id == id) {
            Some(todo) => {
                self.editing = Some(EditState {
                    id: todo.id.clone(),
                    text: todo.text.clone(),
                })
            }
            None => self.fail("edit todo", StoreError::NotFound(id.to_string())),
        }
    }

    fn change_edit(&mut self, text: &str) {
        if let Some(editing) = self.editing.as_mut() {
            editing.text = text.to_string();
        }
    }

    fn cancel_edit(&mut self) {
        self.editing = None;
    }

    /// Blank text keeps the editor open and writes nothing.
    async fn save_edit(&mut self) {
        self.last_error = None;
        let (id, text) = match &self.editing {
            Some(editing) if !editing.text.trim().is_empty() => {
                (editing.id.clone(), editing.text.trim().to_string())
            }
            _ => return,
        };

        match self.repo.update_todo(&id, TodoUpdate::text(text)).await {
            Ok(_) => self.editing = None,
            Err(e) => self.fail("save todo", e),
        }
        self.refresh().await;
    }

    async fn set_completed(&mut self, id: &str, completed: bool) {
        self.last_error = None;
        let result = if completed {
            self.repo.complete_todo(id).await
        } else {
            self.repo.move_back_to_todos(id).await
        };
        if let Err(e) = result {
            self.fail("update todo", e);
        }
        self.refresh().await;
    }

    async fn delete(&mut self, id: &str) {
        self.last_error = None;
        if let Err(e) = self.repo.delete_todo(id).await {
            self.fail("delete todo", e);
        }
        if self.editing.as_ref().is_some_and(|editing| editing.id == id) {
            self.editing = None;
        }
        self.refresh().await;
    }

    fn fail(&mut self, action: &str, error: StoreError) {
        tracing::error!("failed to {}: {}", action, error);
        self.last_error = Some(format!("Failed to {}: {}", action, error));
    }

    fn render(&self, title: &str, empty_message: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", title);
        let _ = writeln!(out, "{}", "=".repeat(title.len()));

        if self.todos.is_empty() {
            let _ = writeln!(out, "{}", empty_message);
        }
        for todo in &self.todos {
            match &self.editing {
                Some(editing) if editing.id == todo.id => {
                    let _ = writeln!(out, "[~] {}  {}_", todo.short_id(), editing.text);
                }
                _ => {
                    let _ = writeln!(out, "{}", todo);
                }
            }
        }

        if let Some(error) = &self.last_error {
            let _ = writeln!(out);
            let _ = writeln!(out, "! {}", error);
        }
        out
    }
}
