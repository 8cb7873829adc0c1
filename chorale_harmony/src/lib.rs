// Chorale Harmonizer
//
// Voices a chord progression for four parts (bass, tenor, alto, soprano)
// following textbook harmony rules. The progression fixes each chord's scale
// degree, inversion and quality; the harmonizer picks the MIDI note every
// voice sings. The problem is modelled as a finite-domain constraint problem
// and solved by branch and bound on a lexicographic cost vector, using the
// `chorale_search` engine.
//
// Architecture:
// - tonality.rs: Keys (major / harmonic minor), chord qualities, pitch-class
//   helpers, and the TonalityModel trait the model reads keys through
// - progression.rs: Chord and progression input, validation against a key
// - config.rs: HarmonyConfig (registers, search budget and strategy,
//   doubling policy, MIDI timing), loadable from JSON
// - network.rs: The voicing variable network (notes, pitch classes,
//   harmonic and melodic intervals) and its linkage check
// - harmonic.rs: Per-chord rules (chord tones, bass note, completeness,
//   doubling table)
// - voice_leading.rs: Rules between chords (parallel perfects, deceptive
//   cadence, contrary motion, common tones)
// - cost.rs: The five-component cost vector
// - harmonizer.rs: Model assembly, search queries, solution read-out
// - midi.rs: MIDI file output
// - error.rs: HarmonyError
//
// Results are deterministic for a given input and configuration.

pub mod config;
pub mod cost;
pub mod error;
pub mod harmonic;
pub mod harmonizer;
pub mod midi;
pub mod network;
pub mod progression;
pub mod tonality;
pub mod voice_leading;

pub use config::{HarmonyConfig, RootDoubling, SearchConfig, VoiceRanges};
pub use cost::CostVector;
pub use error::HarmonyError;
pub use harmonizer::{Harmonization, Harmonizer, ScoredVoicing, Voicing, harmonize};
pub use network::Voice;
pub use progression::{Chord, ChordState, HarmonizationRequest, Progression};
pub use tonality::{ChordQuality, Mode, Tonality};
