//! Built-in demo task catalog.

use serde::{Deserialize, Serialize};

use crate::transport::RunRequest;

const BUILTIN: &str = include_str!("../assets/tasks.json");

/// One predefined clinical task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Clinical context sent with every prompt of this task.
    #[serde(default)]
    pub context: String,
    /// Default question.
    pub question: String,
}

impl Task {
    /// Build the run request for this task, using `prompt` or the default question.
    #[must_use]
    pub fn run_request(&self, prompt: Option<String>) -> RunRequest {
        RunRequest {
            task_id: self.id.clone(),
            prompt: prompt.unwrap_or_else(|| self.question.clone()),
            context: self.context.clone(),
        }
    }
}

/// Ordered collection of tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: Vec<Task>,
}

impl TaskCatalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self, serde_json::Error> {
        Self::from_json(BUILTIN)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            tasks: serde_json::from_str(json)?,
        })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
