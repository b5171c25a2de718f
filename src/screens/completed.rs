use super::{EditState, ListView, View};
use crate::db::TodoRepository;
use crate::models::Todo;

/// Completed todos. Items can be edited, moved back or deleted.
#[derive(Debug)]
pub struct CompletedScreen<'a> {
    list: ListView<'a>,
}

impl<'a> CompletedScreen<'a> {
    pub fn new(repo: &'a TodoRepository) -> Self {
        Self {
            list: ListView::new(repo, View::Completed),
        }
    }

    pub fn todos(&self) -> &[Todo] {
        &self.list.todos
    }

    pub fn editing(&self) -> Option<&EditState> {
        self.list.editing.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.list.loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.list.last_error.as_deref()
    }

    pub async fn on_focus(&mut self) {
        self.list.last_error = None;
        self.list.refresh().await;
    }

    pub fn start_edit(&mut self, id: &str) {
        self.list.start_edit(id);
    }

    pub fn change_edit(&mut self, text: &str) {
        self.list.change_edit(text);
    }

    pub async fn save_edit(&mut self) {
        self.list.save_edit().await;
    }

    pub fn cancel_edit(&mut self) {
        self.list.cancel_edit();
    }

    /// Marks the todo active again.
    pub async fn move_back(&mut self, id: &str) {
        self.list.set_completed(id, false).await;
    }

    pub async fn delete(&mut self, id: &str) {
        self.list.delete(id).await;
    }

    pub fn render(&self) -> String {
        self.list.render("Completed", "No completed todos yet!")
    }
}
