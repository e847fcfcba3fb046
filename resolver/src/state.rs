use crate::data::{NormalizedDataMap, normalize_data};
use crate::metrics_defs::{
    FETCH_RECORDS, RECEIVE_ERROR, RECEIVE_INVALID, RECEIVE_OK, counter, histogram,
};
use serde_json::Value;

/// Why the resolution state is `Errored`. Both causes resolve every flag as a relay.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum ResolutionError {
    /// The payload arrived but is not a list, or is an empty one.
    #[error("Empty data received")]
    InvalidData,

    /// The caller reported a failure, typically from the transport.
    #[error("{0}")]
    Explicit(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum ResolutionState {
    #[default]
    Uninitialized,
    Fetched(NormalizedDataMap),
    Errored(ResolutionError),
}

/// Tracks whether flag data is available.
///
/// ```text
/// Uninitialized --receive(valid)--> Fetched
/// any           --receive(invalid)--> Errored(InvalidData)
/// any           --receive_error--> Errored(Explicit)
/// ```
///
/// Test mode is orthogonal to the base state. Once entered it is never left.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: ResolutionState,
    test_mode: bool,
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine::default()
    }

    /// Accepts a fetch payload. Anything but a non-empty list moves to
    /// `Errored(InvalidData)`. Returns the number of distinct canonical keys.
    pub fn receive(
        &mut self,
        payload: &Value,
        feature_key: &str,
        enabled_key: &str,
    ) -> Result<usize, ResolutionError> {
        let records = match payload {
            Value::Array(records) if !records.is_empty() => records,
            _ => {
                tracing::warn!("rejecting feature payload: {}", ResolutionError::InvalidData);
                counter!(RECEIVE_INVALID).increment(1);
                self.state = ResolutionState::Errored(ResolutionError::InvalidData);
                return Err(ResolutionError::InvalidData);
            }
        };

        let normalized = normalize_data(records, feature_key, enabled_key);
        let keys = normalized.len();

        tracing::info!(records = records.len(), keys, "received feature data");
        counter!(RECEIVE_OK).increment(1);
        histogram!(FETCH_RECORDS).record(records.len() as f64);

        self.state = ResolutionState::Fetched(normalized);
        Ok(keys)
    }

    pub fn receive_error(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "feature data unavailable");
        counter!(RECEIVE_ERROR).increment(1);
        self.state = ResolutionState::Errored(ResolutionError::Explicit(reason));
    }

    /// Returns `false` if test mode was already active.
    pub fn enter_test_mode(&mut self) -> bool {
        if self.test_mode {
            return false;
        }
        tracing::info!("entering test mode, every flag resolves as enabled");
        self.test_mode = true;
        true
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    /// True once valid data was received, and always in test mode.
    pub fn did_fetch_data(&self) -> bool {
        self.test_mode || matches!(self.state, ResolutionState::Fetched(_))
    }

    /// The normalized data, present only while the fetch is considered successful.
    pub fn current_data(&self) -> Option<&NormalizedDataMap> {
        match &self.state {
            ResolutionState::Fetched(data) if self.did_fetch_data() => Some(data),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&ResolutionError> {
        match &self.state {
            ResolutionState::Errored(err) => Some(err),
            _ => None,
        }
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }
}
