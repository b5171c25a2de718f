use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Value of the `type` field written on every todo document.
pub const TODO_DOC_TYPE: &str = "todo";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub text: String,
    pub completed: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

/// Stored shape of a todo. The id lives outside the body as the document key.
#[derive(Debug, Serialize, Deserialize)]
struct TodoBody {
    text: String,
    #[serde(default)]
    completed: Option<bool>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    doc_type: Option<String>,
}

impl Todo {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            completed: false,
            doc_type: Some(TODO_DOC_TYPE.to_string()),
        }
    }

    /// First eight characters of the id, used for display.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    /// Document body for the store (everything except the id).
    pub fn to_body(&self) -> Map<String, Value> {
        let body = TodoBody {
            text: self.text.clone(),
            completed: Some(self.completed),
            doc_type: self.doc_type.clone(),
        };
        match serde_json::to_value(body) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Rebuilds a todo from a stored body. A missing `completed` reads as false.
    pub fn from_body(id: impl Into<String>, body: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let body: TodoBody = serde_json::from_value(Value::Object(body.clone()))?;
        Ok(Self {
            id: id.into(),
            text: body.text,
            completed: body.completed.unwrap_or(false),
            doc_type: body.doc_type,
        })
    }
}

impl fmt::Display for Todo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.completed { "x" } else { " " };
        write!(f, "[{}] {}  {}", mark, self.short_id(), self.text)
    }
}

/// Fields to change on an existing todo. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoUpdate {
    pub text: Option<String>,
    pub completed: Option<bool>,
}

impl TodoUpdate {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            completed: None,
        }
    }

    pub fn completed(completed: bool) -> Self {
        Self {
            text: None,
            completed: Some(completed),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.completed.is_none()
    }

    /// Merge patch containing only the provided fields.
    pub fn to_patch(&self) -> Map<String, Value> {
        let mut patch = Map::new();
        if let Some(text) = &self.text {
            patch.insert("text".to_string(), Value::String(text.clone()));
        }
        if let Some(completed) = self.completed {
            patch.insert("completed".to_string(), Value::Bool(completed));
        }
        patch
    }
}
