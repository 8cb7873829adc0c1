// The voicing variable network: one note variable per voice per chord, plus
// the interval variables derived from them.
//
// For n chords the network holds
// - 4·n note variables (MIDI pitches), bounded by each voice's register and
//   the key's pitch set;
// - 4·n pitch-class variables, pc = note mod 12;
// - 6·n harmonic interval variables, one per voice pair, |upper − lower|,
//   bounded by the pair's maximum spread;
// - 4·(n−1) signed melodic interval variables, next − current, in
//   [−12, 12], and their absolute values.
//
// All links are exact (posted as solver constraints), so they hold at every
// node of the search, not only in solutions. Note variables are declared
// chord by chord, bass to soprano; with input-order branching the search
// therefore voices the progression left to right.
//
// The harmonic and voice-leading rule sets and the cost model only read
// variables out of this struct. `verify` re-checks every link on a finished
// assignment before it is handed to callers.

use std::fmt;

use chorale_search::{Assignment, Rel, Space, VarId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::VoiceRanges;
use crate::error::HarmonyError;
use crate::tonality::TonalityModel;

/// The four voices, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Voice {
    Bass = 0,
    Tenor = 1,
    Alto = 2,
    Soprano = 3,
}

impl Voice {
    pub const ALL: [Voice; 4] = [Voice::Bass, Voice::Tenor, Voice::Alto, Voice::Soprano];
    pub const UPPER: [Voice; 3] = [Voice::Tenor, Voice::Alto, Voice::Soprano];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Voice::Bass => "bass",
            Voice::Tenor => "tenor",
            Voice::Alto => "alto",
            Voice::Soprano => "soprano",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Two simultaneous voices and the widest spread allowed between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoicePair {
    pub lower: Voice,
    pub upper: Voice,
    pub max_spread: i32,
}

/// The six monitored pairs. Adjacent upper voices stay within an octave;
/// the tenor may sit up to a twelfth above the bass.
pub const VOICE_PAIRS: [VoicePair; 6] = [
    VoicePair { lower: Voice::Bass, upper: Voice::Tenor, max_spread: 19 },
    VoicePair { lower: Voice::Bass, upper: Voice::Alto, max_spread: 31 },
    VoicePair { lower: Voice::Bass, upper: Voice::Soprano, max_spread: 43 },
    VoicePair { lower: Voice::Tenor, upper: Voice::Alto, max_spread: 12 },
    VoicePair { lower: Voice::Tenor, upper: Voice::Soprano, max_spread: 24 },
    VoicePair { lower: Voice::Alto, upper: Voice::Soprano, max_spread: 12 },
];

/// Largest melodic leap, in semitones, in either direction.
pub const MAX_LEAP: i32 = 12;

#[derive(Debug, Clone)]
pub struct VoicingNetwork {
    notes: Vec<[VarId; 4]>,
    pitch_classes: Vec<[VarId; 4]>,
    harmonic: Vec<[VarId; 6]>,
    melodic: Vec<[VarId; 4]>,
    abs_melodic: Vec<[VarId; 4]>,
}

impl VoicingNetwork {
    pub fn build(
        space: &mut Space,
        n: usize,
        key: &dyn TonalityModel,
        ranges: &VoiceRanges,
    ) -> Result<Self, HarmonyError> {
        let in_key = key.all_notes();
        if in_key.is_empty() {
            return Err(HarmonyError::InvalidTonality("the key has no notes".into()));
        }

        let mut notes = Vec::with_capacity(n);
        let mut pitch_classes = Vec::with_capacity(n);
        let mut harmonic = Vec::with_capacity(n);
        for _ in 0..n {
            let chord = Voice::ALL.map(|voice| {
                let (lo, hi) = ranges.range(voice);
                space.int_var_in(in_key.iter().copied().filter(|p| (lo..=hi).contains(p)))
            });
            let pcs = chord.map(|note| {
                let pc = space.aux_var(0, 11);
                space.modulo(pc, note, 12);
                pc
            });
            for pair in chord.windows(2) {
                space.linear(&[(1, pair[0]), (-1, pair[1])], Rel::Le, 0);
            }
            let spreads = VOICE_PAIRS.map(|pair| {
                let h = space.aux_var(0, pair.max_spread);
                space.distance(h, chord[pair.lower.index()], chord[pair.upper.index()]);
                h
            });
            notes.push(chord);
            pitch_classes.push(pcs);
            harmonic.push(spreads);
        }

        let mut melodic = Vec::with_capacity(n.saturating_sub(1));
        let mut abs_melodic = Vec::with_capacity(n.saturating_sub(1));
        for i in 0..n.saturating_sub(1) {
            let steps = Voice::ALL.map(|voice| {
                let m = space.aux_var(-MAX_LEAP, MAX_LEAP);
                space.difference(m, notes[i + 1][voice.index()], notes[i][voice.index()]);
                m
            });
            let sizes = steps.map(|m| {
                let a = space.aux_var(0, MAX_LEAP);
                space.abs(a, m);
                a
            });
            melodic.push(steps);
            abs_melodic.push(sizes);
        }

        debug!(
            chords = n,
            vars = space.num_vars(),
            propagators = space.num_propagators(),
            "voicing network built"
        );
        Ok(VoicingNetwork {
            notes,
            pitch_classes,
            harmonic,
            melodic,
            abs_melodic,
        })
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn note(&self, voice: Voice, i: usize) -> VarId {
        self.notes[i][voice.index()]
    }

    /// The four notes of chord `i`, bass first.
    pub fn chord_notes(&self, i: usize) -> [VarId; 4] {
        self.notes[i]
    }

    pub fn pitch_class(&self, voice: Voice, i: usize) -> VarId {
        self.pitch_classes[i][voice.index()]
    }

    pub fn chord_pitch_classes(&self, i: usize) -> [VarId; 4] {
        self.pitch_classes[i]
    }

    /// Harmonic interval of `VOICE_PAIRS[pair]` in chord `i`.
    pub fn harmonic(&self, pair: usize, i: usize) -> VarId {
        self.harmonic[i][pair]
    }

    /// Signed motion of `voice` from chord `i` to chord `i + 1`.
    pub fn melodic(&self, voice: Voice, i: usize) -> VarId {
        self.melodic[i][voice.index()]
    }

    pub fn abs_melodic(&self, voice: Voice, i: usize) -> VarId {
        self.abs_melodic[i][voice.index()]
    }

    /// Every absolute melodic interval, transition by transition.
    pub fn all_abs_melodic(&self) -> Vec<VarId> {
        self.abs_melodic.iter().flatten().copied().collect()
    }

    /// Re-check the links and the voice ordering on a finished assignment.
    pub fn verify(&self, assignment: &Assignment) -> Result<(), HarmonyError> {
        let defect = |what: String| Err(HarmonyError::ModelDefect(what));
        for i in 0..self.len() {
            let chord = assignment.values_of(&self.notes[i]);
            if chord.windows(2).any(|w| w[0] > w[1]) {
                return defect(format!("chord {i} voices out of order: {chord:?}"));
            }
            for voice in Voice::ALL {
                let note = chord[voice.index()];
                if assignment.value(self.pitch_class(voice, i)) != note.rem_euclid(12) {
                    return defect(format!("chord {i} {voice} pitch class unlinked"));
                }
            }
            for (p, pair) in VOICE_PAIRS.iter().enumerate() {
                let spread = (chord[pair.upper.index()] - chord[pair.lower.index()]).abs();
                if assignment.value(self.harmonic(p, i)) != spread {
                    return defect(format!(
                        "chord {i} {}-{} interval unlinked",
                        pair.lower, pair.upper
                    ));
                }
            }
            if i + 1 < self.len() {
                for voice in Voice::ALL {
                    let step = assignment.value(self.note(voice, i + 1)) - chord[voice.index()];
                    if assignment.value(self.melodic(voice, i)) != step
                        || assignment.value(self.abs_melodic(voice, i)) != step.abs()
                    {
                        return defect(format!("transition {i} {voice} motion unlinked"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tonality::{Mode, Tonality};
    use chorale_search::{SearchOptions, SolveMode, solve};

    fn build(n: usize) -> (Space, VoicingNetwork) {
        let key = Tonality::new(0, Mode::Major).unwrap();
        let mut space = Space::new();
        let net = VoicingNetwork::build(&mut space, n, &key, &VoiceRanges::default()).unwrap();
        (space, net)
    }

    #[test]
    fn test_variable_counts() {
        let (space, net) = build(3);
        assert_eq!(net.len(), 3);
        assert_eq!(space.decisions().len(), 12);
        assert_eq!(net.all_abs_melodic().len(), 8);
    }

    #[test]
    fn test_note_domains_respect_register_and_key() {
        let (space, net) = build(1);
        let bass = space.dom(net.note(Voice::Bass, 0));
        assert_eq!(bass.min(), 40);
        assert_eq!(bass.max(), 60);
        assert!(!bass.contains(42)); // F# is not in C major
        let soprano = space.dom(net.note(Voice::Soprano, 0));
        assert_eq!(soprano.max(), 79);
    }

    #[test]
    fn test_links_hold_in_solutions() {
        let (space, net) = build(2);
        let options = SearchOptions {
            value_selection: chorale_search::ValueSelection::Random,
            seed: 3,
            ..SearchOptions::default()
        };
        for solution in solve(space, SolveMode::AllSolutions, options).unwrap().take(25) {
            net.verify(&solution.assignment).unwrap();
        }
    }

    #[test]
    fn test_ordering_propagates() {
        let (mut space, net) = build(1);
        space.restrict(net.note(Voice::Alto, 0), [60]);
        space.status();
        assert!(space.dom(net.note(Voice::Tenor, 0)).max() <= 60);
        assert!(space.dom(net.note(Voice::Soprano, 0)).min() >= 60);
        // Alto-soprano spread is at most an octave.
        assert!(space.dom(net.note(Voice::Soprano, 0)).max() <= 72);
    }

    #[test]
    fn test_melodic_link_propagates() {
        let (mut space, net) = build(2);
        space.restrict(net.note(Voice::Soprano, 0), [67]);
        space.restrict(net.melodic(Voice::Soprano, 0), [0]);
        space.status();
        assert_eq!(space.value(net.note(Voice::Soprano, 1)), Some(67));
        assert_eq!(space.value(net.abs_melodic(Voice::Soprano, 0)), Some(0));
    }

    #[test]
    fn test_single_chord_has_no_transitions() {
        let (_, net) = build(1);
        assert!(net.all_abs_melodic().is_empty());
    }
}
