use serde::{Deserialize, Serialize};

/// A proposed next command with its confidence score.
///
/// Scores are conceptually in `[0, 1]` but are not clamped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub command: String,
    pub score: f64,
}

impl Candidate {
    pub fn new(command: impl Into<String>, score: f64) -> Self {
        Self {
            command: command.into(),
            score,
        }
    }
}

/// Input to a single prediction call.
///
/// `history` is supplied by the caller on every request; it is never
/// backfilled from the persistent store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub current_input: String,
    #[serde(default)]
    pub history: Vec<String>,
}

impl PredictionRequest {
    pub fn new(current_input: impl Into<String>, history: Vec<String>) -> Self {
        Self {
            current_input: current_input.into(),
            history,
        }
    }
}
