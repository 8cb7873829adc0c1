// Chord progressions: the input to the harmonizer.
//
// A progression is an ordered list of chords, each given as a scale degree
// (0-6), an inversion state, and optionally a quality. Omitted qualities
// default to the diatonic triad of the degree in the key.
//
// `Progression::resolve` validates the input against a key and turns each
// chord into a `ResolvedChord` carrying the concrete pitch classes of its
// tones. Every check happens here, before any solver variable is created,
// so malformed input never reaches the search.
//
// Text form (command line): `degree:state[:quality]`, e.g. `4:1:dom7` for
// a first-inversion V7. JSON form: see `HarmonizationRequest`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarmonyError;
use crate::tonality::{ChordQuality, Mode, Tonality};

/// Which chord tone sounds in the bass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordState {
    /// Root in the bass.
    Fundamental,
    /// Third in the bass.
    First,
    /// Fifth in the bass.
    Second,
    /// Seventh in the bass (seventh chords only).
    Third,
}

impl ChordState {
    /// Index of the bass tone within root, third, fifth, seventh.
    pub fn bass_tone_index(self) -> usize {
        match self {
            ChordState::Fundamental => 0,
            ChordState::First => 1,
            ChordState::Second => 2,
            ChordState::Third => 3,
        }
    }

    fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(ChordState::Fundamental),
            1 => Some(ChordState::First),
            2 => Some(ChordState::Second),
            3 => Some(ChordState::Third),
            _ => None,
        }
    }
}

impl FromStr for ChordState {
    type Err = HarmonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "fundamental" | "root" | "fund" => Some(ChordState::Fundamental),
            "first" => Some(ChordState::First),
            "second" => Some(ChordState::Second),
            "third" => Some(ChordState::Third),
            _ => s.parse::<u8>().ok().and_then(ChordState::from_index),
        };
        state.ok_or_else(|| {
            HarmonyError::MalformedProgression(format!("unknown chord state '{s}'"))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chord {
    pub degree: u8,
    pub state: ChordState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<ChordQuality>,
}

impl Chord {
    pub fn new(degree: u8, state: ChordState) -> Self {
        Chord {
            degree,
            state,
            quality: None,
        }
    }

    pub fn with_quality(degree: u8, state: ChordState, quality: ChordQuality) -> Self {
        Chord {
            degree,
            state,
            quality: Some(quality),
        }
    }
}

impl FromStr for Chord {
    type Err = HarmonyError;

    /// `degree:state[:quality]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(HarmonyError::MalformedProgression(format!(
                "expected degree:state[:quality], got '{s}'"
            )));
        }
        let degree = parts[0].parse::<u8>().map_err(|_| {
            HarmonyError::MalformedProgression(format!("bad degree in '{s}'"))
        })?;
        let state = parts[1].parse()?;
        let quality = parts.get(2).map(|q| q.parse()).transpose()?;
        Ok(Chord {
            degree,
            state,
            quality,
        })
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.degree, self.state.bass_tone_index())?;
        if let Some(q) = self.quality {
            write!(f, ":{}", q.short_name())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progression {
    pub chords: Vec<Chord>,
}

impl Progression {
    pub fn new(chords: Vec<Chord>) -> Self {
        Progression { chords }
    }

    /// Build from parallel degree / state (/ quality) lists.
    pub fn from_parts(
        degrees: &[u8],
        states: &[ChordState],
        qualities: Option<&[ChordQuality]>,
    ) -> Result<Self, HarmonyError> {
        if degrees.len() != states.len() {
            return Err(HarmonyError::MalformedProgression(format!(
                "{} degrees but {} states",
                degrees.len(),
                states.len()
            )));
        }
        match qualities {
            Some(q) if q.len() != degrees.len() => {
                return Err(HarmonyError::MalformedProgression(format!(
                    "{} degrees but {} qualities",
                    degrees.len(),
                    q.len()
                )));
            }
            _ => {}
        }
        let chords = degrees
            .iter()
            .zip(states)
            .enumerate()
            .map(|(i, (&degree, &state))| Chord {
                degree,
                state,
                quality: qualities.map(|q| q[i]),
            })
            .collect();
        Ok(Progression { chords })
    }

    /// Parse `degree:state[:quality]` tokens.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, HarmonyError> {
        let chords = tokens
            .iter()
            .map(|t| t.as_ref().parse())
            .collect::<Result<Vec<Chord>, _>>()?;
        Ok(Progression { chords })
    }

    pub fn len(&self) -> usize {
        self.chords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }

    /// Validate against `key` and compute each chord's pitch classes.
    pub fn resolve(&self, key: &Tonality) -> Result<Vec<ResolvedChord>, HarmonyError> {
        if self.chords.is_empty() {
            return Err(HarmonyError::MalformedProgression(
                "progression has no chords".into(),
            ));
        }
        self.chords
            .iter()
            .enumerate()
            .map(|(i, chord)| resolve_chord(i, chord, key))
            .collect()
    }
}

fn resolve_chord(i: usize, chord: &Chord, key: &Tonality) -> Result<ResolvedChord, HarmonyError> {
    if chord.degree > 6 {
        return Err(HarmonyError::MalformedProgression(format!(
            "chord {i}: degree {} is outside 0-6",
            chord.degree
        )));
    }
    let quality = chord
        .quality
        .unwrap_or_else(|| key.mode().diatonic_quality(chord.degree));
    if chord.state == ChordState::Third && !quality.is_seventh() {
        return Err(HarmonyError::MalformedProgression(format!(
            "chord {i}: third inversion needs a seventh chord, got {}",
            quality.short_name()
        )));
    }
    let tones = key.chord_pitch_classes(chord.degree, quality);
    if let Some(&stray) = tones.iter().find(|&&pc| !key.contains_pitch_class(pc)) {
        return Err(HarmonyError::MalformedProgression(format!(
            "chord {i}: pitch class {stray} of {} on degree {} is not in {key}",
            quality.short_name(),
            chord.degree
        )));
    }
    Ok(ResolvedChord {
        degree: chord.degree,
        state: chord.state,
        quality,
        tones,
    })
}

/// A validated chord with concrete pitch classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChord {
    pub degree: u8,
    pub state: ChordState,
    pub quality: ChordQuality,
    /// Root, third, fifth and (seventh chords) seventh.
    pub tones: Vec<u8>,
}

impl ResolvedChord {
    pub fn root(&self) -> u8 {
        self.tones[0]
    }

    pub fn third(&self) -> u8 {
        self.tones[1]
    }

    pub fn fifth(&self) -> u8 {
        self.tones[2]
    }

    pub fn seventh(&self) -> Option<u8> {
        self.tones.get(3).copied()
    }

    pub fn bass_pitch_class(&self) -> u8 {
        self.tones[self.state.bass_tone_index()]
    }

    pub fn shares_pitch_classes_with(&self, other: &ResolvedChord) -> Vec<u8> {
        self.tones
            .iter()
            .copied()
            .filter(|pc| other.tones.contains(pc))
            .collect()
    }
}

/// A complete request as read from JSON:
///
/// ```json
/// { "tonic": 0, "mode": "major",
///   "chords": [ { "degree": 0, "state": "fundamental" },
///               { "degree": 4, "state": "first", "quality": "dominant_seventh" } ] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonizationRequest {
    pub tonic: u8,
    pub mode: Mode,
    pub chords: Vec<Chord>,
}

impl HarmonizationRequest {
    pub fn from_json(json: &str) -> Result<Self, HarmonyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, HarmonyError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn tonality(&self) -> Result<Tonality, HarmonyError> {
        Tonality::new(self.tonic, self.mode)
    }

    pub fn progression(&self) -> Progression {
        Progression::new(self.chords.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c_major() -> Tonality {
        Tonality::new(0, Mode::Major).unwrap()
    }

    #[test]
    fn test_parse_tokens() {
        let p = Progression::parse(&["0:0", "3:fundamental", "4:1:dom7", "0:0"]).unwrap();
        assert_eq!(p.len(), 4);
        assert_eq!(p.chords[1].state, ChordState::Fundamental);
        assert_eq!(p.chords[2].quality, Some(ChordQuality::DominantSeventh));
        assert_eq!(p.chords[2].to_string(), "4:1:dom7");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Progression::parse(&["0"]).is_err());
        assert!(Progression::parse(&["x:0"]).is_err());
        assert!(Progression::parse(&["0:7"]).is_err());
        assert!(Progression::parse(&["0:0:sus4"]).is_err());
    }

    #[test]
    fn test_empty_progression_is_malformed() {
        let err = Progression::default().resolve(&c_major()).unwrap_err();
        assert!(matches!(err, HarmonyError::MalformedProgression(_)));
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let err = Progression::from_parts(&[0, 4], &[ChordState::Fundamental], None).unwrap_err();
        assert!(matches!(err, HarmonyError::MalformedProgression(_)));
    }

    #[test]
    fn test_degree_out_of_range() {
        let p = Progression::new(vec![Chord::new(7, ChordState::Fundamental)]);
        assert!(matches!(
            p.resolve(&c_major()),
            Err(HarmonyError::MalformedProgression(_))
        ));
    }

    #[test]
    fn test_third_inversion_needs_seventh() {
        let triad = Progression::new(vec![Chord::new(4, ChordState::Third)]);
        assert!(triad.resolve(&c_major()).is_err());
        let seventh = Progression::new(vec![Chord::with_quality(
            4,
            ChordState::Third,
            ChordQuality::DominantSeventh,
        )]);
        let resolved = seventh.resolve(&c_major()).unwrap();
        assert_eq!(resolved[0].bass_pitch_class(), 5); // F
    }

    #[test]
    fn test_out_of_key_quality_is_rejected() {
        // A major triad on ii would need F#.
        let p = Progression::new(vec![Chord::with_quality(
            1,
            ChordState::Fundamental,
            ChordQuality::Major,
        )]);
        assert!(p.resolve(&c_major()).is_err());
    }

    #[test]
    fn test_default_qualities() {
        let p = Progression::parse(&["1:0", "6:0"]).unwrap();
        let resolved = p.resolve(&c_major()).unwrap();
        assert_eq!(resolved[0].quality, ChordQuality::Minor);
        assert_eq!(resolved[1].quality, ChordQuality::Diminished);
        assert_eq!(resolved[1].tones, vec![11, 2, 5]);
    }

    #[test]
    fn test_shared_pitch_classes() {
        let resolved = Progression::parse(&["0:0", "5:0"]).unwrap().resolve(&c_major()).unwrap();
        let mut shared = resolved[0].shares_pitch_classes_with(&resolved[1]);
        shared.sort_unstable();
        assert_eq!(shared, vec![0, 4]);
    }

    #[test]
    fn test_request_from_json() {
        let json = r#"{
            "tonic": 9,
            "mode": "minor",
            "chords": [
                { "degree": 0, "state": "fundamental" },
                { "degree": 4, "state": "first", "quality": "dominant_seventh" }
            ]
        }"#;
        let req = HarmonizationRequest::from_json(json).unwrap();
        assert_eq!(req.tonality().unwrap().tonic(), 9);
        let resolved = req.progression().resolve(&req.tonality().unwrap()).unwrap();
        // G# in the bass of E7/G#.
        assert_eq!(resolved[1].bass_pitch_class(), 8);
    }
}
