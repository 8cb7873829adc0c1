// Harmonizer configuration.
//
// Every tunable lives in `HarmonyConfig`: voice registers, search strategy
// and budget, the root-doubling policy, how many near-optimal alternatives
// to keep, and MIDI timing. Loaded from JSON; any field left out takes its
// default, so a config file only needs to mention what it changes.
//
// `validate()` runs before model building. A register that is empty or
// upside down is a configuration error, not an infeasible progression.

use std::path::Path;
use std::time::Duration;

use chorale_search::{SearchOptions, ValueSelection, VarSelection};
use serde::{Deserialize, Serialize};

use crate::error::HarmonyError;
use crate::network::Voice;

/// Inclusive MIDI registers per voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceRanges {
    pub bass: (i32, i32),
    pub tenor: (i32, i32),
    pub alto: (i32, i32),
    pub soprano: (i32, i32),
}

impl Default for VoiceRanges {
    fn default() -> Self {
        Self {
            bass: (40, 60),    // E2-C4
            tenor: (48, 69),   // C3-A4
            alto: (55, 74),    // G3-D5
            soprano: (60, 79), // C4-G5
        }
    }
}

impl VoiceRanges {
    pub fn range(&self, voice: Voice) -> (i32, i32) {
        match voice {
            Voice::Bass => self.bass,
            Voice::Tenor => self.tenor,
            Voice::Alto => self.alto,
            Voice::Soprano => self.soprano,
        }
    }
}

/// How a fundamental-state major or minor triad treats its root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootDoubling {
    /// Undoubled roots are allowed but counted in the cost vector.
    #[default]
    Soft,
    /// The root must appear exactly twice.
    Strict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Wall-clock budget per search, in milliseconds. `None` searches until
    /// the tree is exhausted.
    pub timeout_ms: Option<u64>,
    pub var_selection: VarSelection,
    pub value_selection: ValueSelection,
    /// Seed for `ValueSelection::Random`.
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Some(10_000),
            var_selection: VarSelection::InputOrder,
            value_selection: ValueSelection::Min,
            seed: 0,
        }
    }
}

impl SearchConfig {
    pub fn options(&self) -> SearchOptions {
        SearchOptions {
            timeout: self.timeout_ms.map(Duration::from_millis),
            var_selection: self.var_selection,
            value_selection: self.value_selection,
            seed: self.seed,
            initial_bound: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonyConfig {
    pub ranges: VoiceRanges,
    pub search: SearchConfig,
    pub root_doubling: RootDoubling,
    /// Earlier incumbents kept as near-optimal alternatives.
    pub max_alternatives: usize,
    /// Quarter notes per minute in MIDI output.
    pub tempo_bpm: u16,
    /// Length of each chord in MIDI ticks (480 per quarter note).
    pub chord_ticks: u32,
}

impl Default for HarmonyConfig {
    fn default() -> Self {
        Self {
            ranges: VoiceRanges::default(),
            search: SearchConfig::default(),
            root_doubling: RootDoubling::Soft,
            max_alternatives: 3,
            tempo_bpm: 72,
            chord_ticks: 960,
        }
    }
}

impl HarmonyConfig {
    pub fn from_json(json: &str) -> Result<Self, HarmonyError> {
        let config: HarmonyConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, HarmonyError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), HarmonyError> {
        for voice in Voice::ALL {
            let (lo, hi) = self.ranges.range(voice);
            if lo > hi || lo < 0 || hi > 127 {
                return Err(HarmonyError::Config(format!(
                    "{} register {lo}-{hi} is not a MIDI range",
                    voice.name()
                )));
            }
        }
        if self.tempo_bpm == 0 {
            return Err(HarmonyError::Config("tempo_bpm must be positive".into()));
        }
        // MIDI delta times are 28-bit.
        if self.chord_ticks == 0 || self.chord_ticks > 0x0FFF_FFFF {
            return Err(HarmonyError::Config(format!(
                "chord_ticks {} is out of range",
                self.chord_ticks
            )));
        }
        Ok(())
    }
}
