mod todo;

pub use todo::{Todo, TodoUpdate, TODO_DOC_TYPE};
