// Error type for the harmonizer.
//
// Input problems (`MalformedProgression`, `InvalidTonality`) are reported
// before any solver variable exists. `InfeasibleProgression` and `Timeout`
// come out of the search. `ModelDefect` means a solution read back from the
// solver broke the note/interval linkage or the voice ordering; it signals a
// bug in the model rather than bad input. The remaining variants wrap
// failures of the outer layers (configuration files, MIDI output).

use std::io;

use chorale_search::SearchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarmonyError {
    /// The progression cannot be voiced as written (empty, degree out of
    /// range, third inversion of a triad, chord tones outside the key...).
    #[error("malformed progression: {0}")]
    MalformedProgression(String),

    #[error("invalid tonality: {0}")]
    InvalidTonality(String),

    /// Search finished without finding any voicing.
    #[error("no voicing satisfies the rules for this progression")]
    InfeasibleProgression,

    /// The time budget ran out before a first voicing was found.
    #[error("no voicing found within {budget_ms} ms")]
    Timeout { budget_ms: u64 },

    #[error("model defect: {0}")]
    ModelDefect(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = HarmonyError::MalformedProgression("empty".into());
        assert_eq!(err.to_string(), "malformed progression: empty");
        let err = HarmonyError::Timeout { budget_ms: 250 };
        assert_eq!(err.to_string(), "no voicing found within 250 ms");
    }

    #[test]
    fn test_from_search_error() {
        let err: HarmonyError = SearchError::NoObjective.into();
        assert!(matches!(err, HarmonyError::Search(SearchError::NoObjective)));
    }
}
