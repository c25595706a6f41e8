//! The persisted state record
//!
//! One record per resource. It names the last completed step, lists every
//! step completed during the current convergence attempt and keeps a
//! completion flag per step. A step appearing twice in one attempt means the
//! transition graph looped; [`StateRecord::complete`] refuses that.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Progress of one convergence attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    /// Last completed step; transitions are evaluated from here
    pub current_state: String,
    /// Steps completed during this attempt, oldest first
    #[serde(default)]
    pub state_history: Vec<String>,
    #[serde(default)]
    pub state_completion: BTreeMap<String, bool>,
}

/// A step completed twice within one attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step {step} already completed in this attempt, history: {history:?}")]
pub struct CycleDetected {
    pub step: String,
    pub history: Vec<String>,
}

impl StateRecord {
    /// Fresh record positioned on the start step
    #[must_use]
    pub fn start(start: impl Into<String>) -> Self {
        let start = start.into();
        Self {
            state_history: vec![start.clone()],
            state_completion: BTreeMap::from([(start.clone(), true)]),
            current_state: start,
        }
    }

    #[inline]
    #[must_use]
    pub fn current(&self) -> &str {
        &self.current_state
    }

    /// Whether `step` already completed in this attempt
    #[inline]
    #[must_use]
    pub fn contains(&self, step: &str) -> bool {
        self.state_history.iter().any(|s| s == step)
    }

    #[inline]
    #[must_use]
    pub fn is_completed(&self, step: &str) -> bool {
        self.state_completion.get(step).copied().unwrap_or(false)
    }

    /// Record `step` as completed and make it current
    ///
    /// # Errors
    /// [`CycleDetected`] if `step` is already in the history; the record is
    /// left unchanged
    pub fn complete(&mut self, step: &str) -> Result<(), CycleDetected> {
        if self.contains(step) {
            return Err(CycleDetected {
                step: step.to_string(),
                history: self.state_history.clone(),
            });
        }
        self.state_history.push(step.to_string());
        self.state_completion.insert(step.to_string(), true);
        self.current_state = step.to_string();
        Ok(())
    }

    /// Parse from the persisted JSON form
    ///
    /// # Errors
    /// Returns the decoding error for malformed input
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Encode to the persisted JSON form
    ///
    /// # Errors
    /// Returns the encoding error
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_record_is_positioned_on_start() {
        let record = StateRecord::start("Start");
        assert_eq!(record.current(), "Start");
        assert_eq!(record.state_history, vec!["Start"]);
        assert!(record.is_completed("Start"));
    }

    #[test]
    fn completing_appends() {
        let mut record = StateRecord::start("Start");
        record.complete("ValidateSpec").unwrap();
        assert_eq!(record.current(), "ValidateSpec");
        assert_eq!(record.state_history, vec!["Start", "ValidateSpec"]);
    }

    #[test]
    fn repeat_is_a_cycle() {
        let mut record = StateRecord::start("Start");
        record.complete("A").unwrap();
        let before = record.clone();
        let err = record.complete("A").unwrap_err();
        assert_eq!(err.step, "A");
        assert_eq!(record, before);
    }

    #[test]
    fn json_shape() {
        let record = StateRecord::start("Start");
        let json = record.to_json().unwrap();
        assert!(json.contains("\"currentState\":\"Start\""));
        assert!(json.contains("\"stateHistory\""));
        assert_eq!(StateRecord::from_json(&json).unwrap(), record);
    }
}
