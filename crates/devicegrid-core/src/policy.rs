//! Scheduling and completion policies.
//!
//! Both policies default to the historical behavior: dependencies are
//! recorded but never consulted, and a task completes once its total result
//! count reaches `required_device_count`, regardless of which inputs those
//! results cover.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CoreError, Task, TaskId};

/// Whether a task's `dependencies` gate its candidacy for assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyPolicy {
    /// Dependencies are stored but ignored by the scheduler.
    #[default]
    Ignore,
    /// A task is only assignable once every dependency is done.
    RequireDone,
}

impl DependencyPolicy {
    /// True if `task` may be handed out, given a predicate telling which
    /// tasks are done. Unknown dependencies count as not done.
    pub fn allows<F>(&self, task: &Task, is_done: F) -> bool
    where
        F: Fn(&TaskId) -> bool,
    {
        match self {
            Self::Ignore => true,
            Self::RequireDone => task.dependencies.iter().all(is_done),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::RequireDone => "require-done",
        }
    }
}

impl fmt::Display for DependencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(Self::Ignore),
            "require-done" => Ok(Self::RequireDone),
            other => Err(CoreError::InvalidInput(format!(
                "unknown dependency policy '{other}' (expected ignore|require-done)"
            ))),
        }
    }
}

/// How `required_device_count` decides that a task is done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// Done once the total number of results reaches `required_device_count`,
    /// even if some inputs have no result yet.
    #[default]
    TotalResults,
    /// Additionally require a result from the holder of every input slot.
    EveryInput,
}

impl CompletionPolicy {
    pub fn is_satisfied(&self, task: &Task) -> bool {
        let enough = task.results.len() >= task.required_device_count as usize;
        match self {
            Self::TotalResults => enough,
            Self::EveryInput => {
                enough && task.inputs.iter().all(|slot| task.slot_resulted(slot))
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalResults => "total-results",
            Self::EveryInput => "every-input",
        }
    }
}

impl fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total-results" => Ok(Self::TotalResults),
            "every-input" => Ok(Self::EveryInput),
            other => Err(CoreError::InvalidInput(format!(
                "unknown completion policy '{other}' (expected total-results|every-input)"
            ))),
        }
    }
}
