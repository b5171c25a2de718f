use crate::models::{Todo, TodoUpdate};

use super::error::StoreError;
use super::store::{Document, DocumentStore, Filter};

#[derive(Debug, Clone)]
pub struct TodoRepository {
    store: DocumentStore,
}

impl TodoRepository {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Creates an active todo. Text is trimmed and must not be empty.
    pub async fn add_todo(&self, text: &str) -> Result<Todo, StoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::EmptyText);
        }

        let todo = Todo::new(text);
        self.store.save(&todo.id, &todo.to_body()).await?;
        tracing::info!(id = %todo.id, "added todo");
        Ok(todo)
    }

    pub async fn get_todo(&self, id: &str) -> Result<Option<Todo>, StoreError> {
        match self.store.get(id).await? {
            Some(doc) => decode(doc).map(Some),
            None => Ok(None),
        }
    }

    /// Todos with `completed = false`.
    pub async fn get_active(&self) -> Result<Vec<Todo>, StoreError> {
        self.list(false).await
    }

    /// Todos with `completed = true`.
    pub async fn get_completed(&self) -> Result<Vec<Todo>, StoreError> {
        self.list(true).await
    }

    /// Changes only the provided fields, as one atomic write.
    pub async fn update_todo(&self, id: &str, mut update: TodoUpdate) -> Result<Todo, StoreError> {
        if let Some(text) = update.text.take() {
            let text = text.trim();
            if text.is_empty() {
                return Err(StoreError::EmptyText);
            }
            update.text = Some(text.to_string());
        }

        if update.is_empty() {
            // Nothing to write, but a missing id is still an error
            return self
                .get_todo(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()));
        }

        let doc = self.store.patch(id, &update.to_patch()).await?;
        tracing::info!(id, "updated todo");
        decode(doc)
    }

    pub async fn complete_todo(&self, id: &str) -> Result<Todo, StoreError> {
        self.update_todo(id, TodoUpdate::completed(true)).await
    }

    pub async fn move_back_to_todos(&self, id: &str) -> Result<Todo, StoreError> {
        self.update_todo(id, TodoUpdate::completed(false)).await
    }

    pub async fn delete_todo(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(id).await?;
        tracing::info!(id, "deleted todo");
        Ok(())
    }

    async fn list(&self, completed: bool) -> Result<Vec<Todo>, StoreError> {
        let docs = self.store.find(&Filter::bool("completed", completed)).await?;

        let mut todos = Vec::with_capacity(docs.len());
        for doc in docs {
            match decode(doc) {
                Ok(todo) => todos.push(todo),
                // Documents written by other clients may not be todos
                Err(e) => tracing::warn!("skipping document: {}", e),
            }
        }
        Ok(todos)
    }
}

fn decode(doc: Document) -> Result<Todo, StoreError> {
    Todo::from_body(doc.id.clone(), &doc.body).map_err(|e| StoreError::Malformed {
        id: doc.id,
        reason: e.to_string(),
    })
}
