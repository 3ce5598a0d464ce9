//! The todo item published over the subscribe stream.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of the shared todo list.
///
/// Field order is the order members appear in on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    /// Random (v4) UUID assigned at creation, as a string.
    pub id: String,
    /// Free-form task text supplied by the client.
    pub task: String,
    /// Completion flag. New todos start unchecked.
    pub checked: bool,
}

impl Todo {
    /// Create an unchecked todo with a fresh id.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.into(),
            checked: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_todo_is_unchecked_with_uuid() {
        let todo = Todo::new("buy milk");
        assert!(!todo.checked);
        assert_eq!(todo.task, "buy milk");
        assert!(Uuid::parse_str(&todo.id).is_ok());
    }

    #[test]
    fn serializes_in_declared_order() {
        let todo = Todo {
            id: String::from("1"),
            task: String::from("x"),
            checked: false,
        };
        assert_eq!(
            serde_json::to_string(&todo).unwrap(),
            r#"{"id":"1","task":"x","checked":false}"#
        );
    }
}
