//! The pending-action list and the executor collaborator it is handed to.

use crate::vm::RuntimeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Keep { flags: Vec<String> },
    Discard,
    FileInto { mailbox: String, flags: Vec<String> },
    Redirect { address: String },
}

impl Action {
    pub fn keep() -> Self {
        Action::Keep { flags: Vec::new() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Keep { .. } => "keep",
            Action::Discard => "discard",
            Action::FileInto { .. } => "fileinto",
            Action::Redirect { .. } => "redirect",
        }
    }

    /// Flags carried by a storing action.
    pub fn flags_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            Action::Keep { flags } | Action::FileInto { flags, .. } => Some(flags),
            _ => None,
        }
    }
}

/// Case-insensitive union into `target`, preserving first spelling.
pub fn merge_flags(target: &mut Vec<String>, flags: &[String]) {
    for flag in flags {
        if !target.iter().any(|f| f.eq_ignore_ascii_case(flag)) {
            target.push(flag.clone());
        }
    }
}

/// Ordered, append-only list of actions requested by one run.
#[derive(Debug, Clone)]
pub struct ActionList {
    actions: Vec<Action>,
    implicit_keep: bool,
    redirects: usize,
    max_actions: usize,
    max_redirects: usize,
}

impl ActionList {
    pub fn new(max_actions: usize, max_redirects: usize) -> Self {
        Self { actions: Vec::new(), implicit_keep: true, redirects: 0, max_actions, max_redirects }
    }

    pub fn implicit_keep(&self) -> bool {
        self.implicit_keep
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Queue `action`. Duplicates collapse into the earlier entry: one
    /// `keep`, one `discard`, one `fileinto` per mailbox (flags merged) and
    /// one `redirect` per address.
    pub fn add(&mut self, action: Action) -> Result<(), RuntimeError> {
        // Every queued action, explicit keep included, replaces the implicit one.
        self.implicit_keep = false;
        let existing = self.actions.iter_mut().find(|queued| match (&**queued, &action) {
            (Action::Keep { .. }, Action::Keep { .. }) | (Action::Discard, Action::Discard) => true,
            (Action::FileInto { mailbox: a, .. }, Action::FileInto { mailbox: b, .. }) => a == b,
            (Action::Redirect { address: a }, Action::Redirect { address: b }) => {
                a.eq_ignore_ascii_case(b)
            }
            _ => false,
        });
        if let Some(queued) = existing {
            if let (Some(target), Action::Keep { flags } | Action::FileInto { flags, .. }) =
                (queued.flags_mut(), &action)
            {
                merge_flags(target, flags);
            }
            return Ok(());
        }

        if self.actions.len() >= self.max_actions {
            return Err(RuntimeError::ResourceLimit(format!(
                "more than {} actions",
                self.max_actions
            )));
        }
        if matches!(action, Action::Redirect { .. }) {
            if self.redirects >= self.max_redirects {
                return Err(RuntimeError::ResourceLimit(format!(
                    "more than {} redirects",
                    self.max_redirects
                )));
            }
            self.redirects += 1;
        }
        self.actions.push(action);
        Ok(())
    }

    /// The final ordered list, with `keep` appended if nothing cancelled
    /// the implicit keep.
    pub fn finalize(mut self) -> Vec<Action> {
        if self.implicit_keep {
            self.actions.push(Action::keep());
        }
        self.actions
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The message should be kept and the delivery retried.
    #[error("temporary failure: {0}")]
    Temporary(String),
    /// The message should be rejected.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// Applies finalized actions to the outside world.
pub trait ActionExecutor {
    fn execute(&mut self, action: &Action) -> Result<(), ActionError>;
}

/// Records every action it is handed.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    pub executed: Vec<Action>,
}

impl ActionExecutor for RecordingExecutor {
    fn execute(&mut self, action: &Action) -> Result<(), ActionError> {
        self.executed.push(action.clone());
        Ok(())
    }
}
