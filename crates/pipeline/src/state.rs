//! Stage and pipeline lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Lifecycle state of a stage or of the whole pipeline container.
///
/// Transitions are always requested explicitly, never inferred. The runtime
/// walks intermediate states itself, so requesting `Playing` from `Null` is a
/// single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

impl FromStr for State {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(State::Null),
            "ready" => Ok(State::Ready),
            "paused" => Ok(State::Paused),
            "playing" => Ok(State::Playing),
            other => Err(PipelineError::InvalidConfiguration {
                message: format!("unknown state '{other}'"),
            }),
        }
    }
}

/// Outcome of a transition request that the runtime did not reject.
///
/// `Async` means the transition is still in progress; completion is only
/// observable through the runtime's own state-change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Success,
    Async,
    NoPreroll,
}
