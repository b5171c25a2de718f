use super::{EditState, ListView, View};
use crate::db::TodoRepository;
use crate::models::Todo;

/// Todos that are not completed yet, plus the input line for new ones.
#[derive(Debug)]
pub struct ActiveScreen<'a> {
    list: ListView<'a>,
    input: String,
}

impl<'a> ActiveScreen<'a> {
    pub fn new(repo: &'a TodoRepository) -> Self {
        Self {
            list: ListView::new(repo, View::Active),
            input: String::new(),
        }
    }

    pub fn todos(&self) -> &[Todo] {
        &self.list.todos
    }

    pub fn input(&self) -> &str {
        &self.input
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

    pub fn set_input(&mut self, text: &str) {
        self.input = text.to_string();
    }

    /// Adds the trimmed input as a new todo and clears the input line.
    pub async fn submit(&mut self) {
        self.list.last_error = None;
        let text = self.input.trim().to_string();
        if text.is_empty() {
            self.input.clear();
            return;
        }

        match self.list.repo.add_todo(&text).await {
            Ok(_) => self.input.clear(),
            Err(e) => self.list.fail("add todo", e),
        }
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

    pub async fn complete(&mut self, id: &str) {
        self.list.set_completed(id, true).await;
    }

    pub async fn delete(&mut self, id: &str) {
        self.list.delete(id).await;
    }

    pub fn render(&self) -> String {
        self.list.render("Todos", "No todos yet!")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_store;
    use tempfile::TempDir;

    struct TestContext {
        repo: TodoRepository,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path()).await.unwrap();
        TestContext {
            repo: TodoRepository::new(store),
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_empty_screen() {
        let ctx = setup().await;
        let mut screen = ActiveScreen::new(&ctx.repo);

        screen.on_focus().await;
        assert!(screen.todos().is_empty());
        assert!(!screen.is_loading());
        assert!(screen.render().contains("No todos yet!"));
    }

    #[tokio::test]
    async fn test_submit_adds_trimmed_and_clears_input() {
        let ctx = setup().await;
        let mut screen = ActiveScreen::new(&ctx.repo);

        screen.set_input("  Buy milk  ");
        screen.submit().await;

        assert_eq!(screen.input(), "");
        assert_eq!(screen.todos().len(), 1);
        assert_eq!(screen.todos()[0].text, "Buy milk");
        assert!(screen.render().contains("Buy milk"));
    }

    #[tokio::test]
    async fn test_submit_ignores_blank() {
        let ctx = setup().await;
        let mut screen = ActiveScreen::new(&ctx.repo);

        screen.set_input("   ");
        screen.submit().await;

        assert!(screen.todos().is_empty());
        assert!(screen.last_error().is_none());
        assert!(ctx.repo.get_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_flow() {
        let ctx = setup().await;
        let todo = ctx.repo.add_todo("Old").await.unwrap();
        let mut screen = ActiveScreen::new(&ctx.repo);
        screen.on_focus().await;

        screen.start_edit(&todo.id);
        assert_eq!(screen.editing().unwrap().text, "Old");

        screen.change_edit("  New  ");
        assert!(screen.render().contains("New"));
        screen.save_edit().await;

        assert!(screen.editing().is_none());
        assert_eq!(screen.todos()[0].text, "New");
    }

    #[tokio::test]
    async fn test_save_edit_ignores_blank_and_cancel_discards() {
        let ctx = setup().await;
        let todo = ctx.repo.add_todo("Keep").await.unwrap();
        let mut screen = ActiveScreen::new(&ctx.repo);
        screen.on_focus().await;

        screen.start_edit(&todo.id);
        screen.change_edit("   ");
        screen.save_edit().await;
        assert!(screen.editing().is_some());

        screen.cancel_edit();
        assert!(screen.editing().is_none());
        assert_eq!(ctx.repo.get_todo(&todo.id).await.unwrap().unwrap().text, "Keep");
    }

    #[tokio::test]
    async fn test_complete_removes_from_active() {
        let ctx = setup().await;
        let todo = ctx.repo.add_todo("Finish").await.unwrap();
        let mut screen = ActiveScreen::new(&ctx.repo);
        screen.on_focus().await;

        screen.complete(&todo.id).await;

        assert!(screen.todos().is_empty());
        assert_eq!(ctx.repo.get_completed().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_records_error() {
        let ctx = setup().await;
        let mut screen = ActiveScreen::new(&ctx.repo);

        screen.delete("missing").await;

        let error = screen.last_error().unwrap();
        assert!(error.contains("missing"), "{}", error);
        assert!(screen.render().contains("Failed to delete todo"));
    }

    #[tokio::test]
    async fn test_failed_refresh_shows_empty_list() {
        let ctx = setup().await;
        ctx.repo.add_todo("Hidden").await.unwrap();
        let mut screen = ActiveScreen::new(&ctx.repo);
        screen.on_focus().await;
        assert_eq!(screen.todos().len(), 1);

        ctx.repo.store().close().await;
        screen.on_focus().await;

        assert!(screen.todos().is_empty());
        assert!(screen.last_error().is_some());
    }
}
