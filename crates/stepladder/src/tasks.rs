//! Directory-backed task source.
//!
//! ```text
//! tasks/
//!   <id>/task.json                       {"id", "description", "tests": [...]}
//!   <id>/description.txt + tests.json    tests as [{input, output}] or {inputs, outputs}
//!   <id>/reference_solution.py           optional
//! ```

use std::path::{Path, PathBuf};

use coordination::{Task, TestCase};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {0} has neither task.json nor description.txt")]
    MissingDescription(String),

    #[error("task {0} has an empty description")]
    EmptyDescription(String),

    #[error("task {id}: {inputs} inputs but {outputs} outputs")]
    MismatchedCounts {
        id: String,
        inputs: usize,
        outputs: usize,
    },
}

/// Test list as stored on disk.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TestsFile {
    Cases(Vec<TestCase>),
    Columns {
        inputs: Vec<String>,
        outputs: Vec<String>,
    },
}

impl TestsFile {
    fn into_cases(self, id: &str) -> Result<Vec<TestCase>, TaskError> {
        match self {
            Self::Cases(cases) => Ok(cases),
            Self::Columns { inputs, outputs } => {
                if inputs.len() != outputs.len() {
                    return Err(TaskError::MismatchedCounts {
                        id: id.to_string(),
                        inputs: inputs.len(),
                        outputs: outputs.len(),
                    });
                }
                Ok(inputs
                    .into_iter()
                    .zip(outputs)
                    .map(|(input, output)| TestCase { input, output })
                    .collect())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    id: Option<String>,
    description: String,
    #[serde(default)]
    tests: Option<TestsFile>,
}

/// A task plus its optional reference solution.
#[derive(Debug, Clone)]
pub struct LoadedTask {
    pub task: Task,
    pub reference_solution: Option<String>,
    pub dir: PathBuf,
}

/// Read-only supplier of tasks rooted at one directory.
#[derive(Debug, Clone)]
pub struct TaskSource {
    root: PathBuf,
}

impl TaskSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Task ids (sub-directory names), sorted.
    pub fn ids(&self) -> Result<Vec<String>, TaskError> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| TaskError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| TaskError::Io {
                path: self.root.clone(),
                source,
            })?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn load(&self, id: &str) -> Result<LoadedTask, TaskError> {
        let dir = self.root.join(id);
        if !dir.is_dir() {
            return Err(TaskError::NotFound(id.to_string()));
        }

        let task_json = dir.join("task.json");
        let (task_id, description, tests) = if task_json.is_file() {
            let file: TaskFile = read_json(&task_json)?;
            let task_id = file
                .id
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| id.to_string());
            let tests = match file.tests {
                Some(tests) => tests.into_cases(&task_id)?,
                None => Vec::new(),
            };
            (task_id, file.description, tests)
        } else {
            let description_path = dir.join("description.txt");
            if !description_path.is_file() {
                return Err(TaskError::MissingDescription(id.to_string()));
            }
            let description = read_text(&description_path)?;
            let tests_path = dir.join("tests.json");
            let tests = if tests_path.is_file() {
                read_json::<TestsFile>(&tests_path)?.into_cases(id)?
            } else {
                Vec::new()
            };
            (id.to_string(), description, tests)
        };

        if description.trim().is_empty() {
            return Err(TaskError::EmptyDescription(task_id));
        }
        if tests.is_empty() {
            warn!(task_id = %task_id, "Task has no test cases; validation will pass trivially");
        }

        Ok(LoadedTask {
            task: Task::new(task_id, description.trim()).with_tests(tests),
            reference_solution: read_reference(&dir)?,
            dir,
        })
    }

    /// Every loadable task. Broken directories are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<LoadedTask>, TaskError> {
        let mut tasks = Vec::new();
        for id in self.ids()? {
            match self.load(&id) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(task_id = %id, error = %e, "Skipping task"),
            }
        }
        Ok(tasks)
    }

    /// `only` if given, otherwise every task.
    pub fn select(&self, only: Option<&str>) -> Result<Vec<LoadedTask>, TaskError> {
        match only {
            Some(id) => Ok(vec![self.load(id)?]),
            None => self.load_all(),
        }
    }
}

fn read_text(path: &Path) -> Result<String, TaskError> {
    std::fs::read_to_string(path).map_err(|source| TaskError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, TaskError> {
    let raw = read_text(path)?;
    serde_json::from_str(&raw).map_err(|source| TaskError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// First `reference_solution.*` file, by name.
fn read_reference(dir: &Path) -> Result<Option<String>, TaskError> {
    let entries = std::fs::read_dir(dir).map_err(|source| TaskError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_stem()
                    .is_some_and(|stem| stem == "reference_solution")
        })
        .collect();
    candidates.sort();
    match candidates.first() {
        Some(path) => read_text(path).map(Some),
        None => Ok(None),
    }
}
