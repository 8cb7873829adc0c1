// Keys, scale degrees, and chord qualities.
//
// A `Tonality` is a tonic pitch class plus a mode. Major uses the major
// scale; minor uses the harmonic minor scale (raised seventh), so the
// dominant is a major triad and the leading tone sits a semitone below the
// tonic in both modes.
//
// Scale degrees are 0-based throughout (0 = tonic, 4 = dominant, 6 =
// leading tone). Degrees 0, 3 and 4 are the tonal degrees; 2, 5 and 6 are
// the modal degrees, the ones that differ between major and minor.
//
// The harmonizer only reads key information through the `TonalityModel`
// trait, so an alternative key model (modal scales, melodic minor) can be
// swapped in without touching the constraint model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarmonyError;

/// Lowest pitch any chord tone may take (A0).
pub const REGISTER_LOW: i32 = 21;
/// Highest pitch any chord tone may take (C8).
pub const REGISTER_HIGH: i32 = 108;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    /// Harmonic minor.
    Minor,
}

impl Mode {
    /// Semitones from the tonic to each of the seven degrees.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            Mode::Major => [0, 2, 4, 5, 7, 9, 11],
            Mode::Minor => [0, 2, 3, 5, 7, 8, 11],
        }
    }

    /// The triad built on `degree` from the scale's own notes.
    pub fn diatonic_quality(self, degree: u8) -> ChordQuality {
        use ChordQuality::*;
        let table = match self {
            Mode::Major => [Major, Minor, Minor, Major, Major, Minor, Diminished],
            Mode::Minor => [Minor, Diminished, Augmented, Minor, Major, Major, Diminished],
        };
        table[(degree % 7) as usize]
    }
}

impl FromStr for Mode {
    type Err = HarmonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "major" | "maj" => Ok(Mode::Major),
            "minor" | "min" => Ok(Mode::Minor),
            _ => Err(HarmonyError::InvalidTonality(format!("unknown mode '{s}'"))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    DominantSeventh,
    MajorSeventh,
    MinorSeventh,
    HalfDiminishedSeventh,
    DiminishedSeventh,
}

impl ChordQuality {
    /// Semitones above the root for root, third, fifth and (for seventh
    /// chords) seventh.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Diminished => &[0, 3, 6],
            ChordQuality::Augmented => &[0, 4, 8],
            ChordQuality::DominantSeventh => &[0, 4, 7, 10],
            ChordQuality::MajorSeventh => &[0, 4, 7, 11],
            ChordQuality::MinorSeventh => &[0, 3, 7, 10],
            ChordQuality::HalfDiminishedSeventh => &[0, 3, 6, 10],
            ChordQuality::DiminishedSeventh => &[0, 3, 6, 9],
        }
    }

    pub fn is_seventh(self) -> bool {
        self.intervals().len() == 4
    }

    /// Plain major or minor triad.
    pub fn is_consonant_triad(self) -> bool {
        matches!(self, ChordQuality::Major | ChordQuality::Minor)
    }

    pub fn short_name(self) -> &'static str {
        match self {
            ChordQuality::Major => "M",
            ChordQuality::Minor => "m",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "aug",
            ChordQuality::DominantSeventh => "dom7",
            ChordQuality::MajorSeventh => "maj7",
            ChordQuality::MinorSeventh => "m7",
            ChordQuality::HalfDiminishedSeventh => "hdim7",
            ChordQuality::DiminishedSeventh => "dim7",
        }
    }
}

impl FromStr for ChordQuality {
    type Err = HarmonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let quality = match s {
            "M" | "maj" | "major" => ChordQuality::Major,
            "m" | "min" | "minor" => ChordQuality::Minor,
            "dim" | "diminished" => ChordQuality::Diminished,
            "aug" | "augmented" => ChordQuality::Augmented,
            "7" | "dom7" | "dominant_seventh" => ChordQuality::DominantSeventh,
            "maj7" | "major_seventh" => ChordQuality::MajorSeventh,
            "m7" | "min7" | "minor_seventh" => ChordQuality::MinorSeventh,
            "hdim7" | "m7b5" | "half_diminished_seventh" => ChordQuality::HalfDiminishedSeventh,
            "dim7" | "diminished_seventh" => ChordQuality::DiminishedSeventh,
            _ => {
                return Err(HarmonyError::MalformedProgression(format!(
                    "unknown chord quality '{s}'"
                )));
            }
        };
        Ok(quality)
    }
}

/// Functional class of a pitch within a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteClass {
    /// Degrees 0, 3, 4: tonic, subdominant, dominant.
    Tonal,
    /// Degrees 2, 5, 6: the degrees that distinguish major from minor.
    Modal,
    /// The supertonic, or a pitch outside the key.
    Other,
}

/// Key information the constraint model consumes.
pub trait TonalityModel {
    /// Pitch classes that realize `degree` (one per degree for the scales
    /// implemented here).
    fn scale_degree_notes(&self, degree: u8) -> Vec<u8>;

    /// Every pitch in the usable register whose pitch class belongs to the
    /// chord on `degree` with `quality`, ascending.
    fn chord_tones(&self, degree: u8, quality: ChordQuality) -> Vec<i32>;

    /// The degree's pitch in the octave starting at middle C's octave.
    fn degree_reference_note(&self, degree: u8) -> i32;

    fn classify(&self, pitch: i32) -> NoteClass;

    /// Every in-key pitch in the usable register, ascending.
    fn all_notes(&self) -> Vec<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tonality {
    tonic: u8,
    mode: Mode,
}

impl Tonality {
    pub fn new(tonic: u8, mode: Mode) -> Result<Self, HarmonyError> {
        if tonic > 11 {
            return Err(HarmonyError::InvalidTonality(format!(
                "tonic pitch class {tonic} is outside 0-11"
            )));
        }
        Ok(Tonality { tonic, mode })
    }

    pub fn tonic(&self) -> u8 {
        self.tonic
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn degree_pitch_class(&self, degree: u8) -> u8 {
        (self.tonic + self.mode.intervals()[(degree % 7) as usize]) % 12
    }

    /// Pitch classes of the chord on `degree`: root, third, fifth and, for
    /// seventh chords, seventh.
    pub fn chord_pitch_classes(&self, degree: u8, quality: ChordQuality) -> Vec<u8> {
        let root = self.degree_pitch_class(degree);
        quality
            .intervals()
            .iter()
            .map(|&iv| (root + iv) % 12)
            .collect()
    }

    /// The 12 pitch classes, flagged by key membership.
    pub fn pitch_classes(&self) -> [bool; 12] {
        let mut pcs = [false; 12];
        for &iv in &self.mode.intervals() {
            pcs[((self.tonic + iv) % 12) as usize] = true;
        }
        pcs
    }

    pub fn contains_pitch_class(&self, pc: u8) -> bool {
        self.pitch_classes()[(pc % 12) as usize]
    }

    /// Scale degree of a pitch, or None if it is outside the key.
    pub fn scale_degree(&self, pitch: i32) -> Option<u8> {
        let pc = pitch_class(pitch);
        (0..7).find(|&d| self.degree_pitch_class(d) == pc)
    }
}

impl TonalityModel for Tonality {
    fn scale_degree_notes(&self, degree: u8) -> Vec<u8> {
        vec![self.degree_pitch_class(degree)]
    }

    fn chord_tones(&self, degree: u8, quality: ChordQuality) -> Vec<i32> {
        let pcs = self.chord_pitch_classes(degree, quality);
        (REGISTER_LOW..=REGISTER_HIGH)
            .filter(|&p| pcs.contains(&pitch_class(p)))
            .collect()
    }

    fn degree_reference_note(&self, degree: u8) -> i32 {
        60 + self.tonic as i32 + self.mode.intervals()[(degree % 7) as usize] as i32
    }

    fn classify(&self, pitch: i32) -> NoteClass {
        match self.scale_degree(pitch) {
            Some(0 | 3 | 4) => NoteClass::Tonal,
            Some(2 | 5 | 6) => NoteClass::Modal,
            _ => NoteClass::Other,
        }
    }

    fn all_notes(&self) -> Vec<i32> {
        let pcs = self.pitch_classes();
        (REGISTER_LOW..=REGISTER_HIGH)
            .filter(|&p| pcs[pitch_class(p) as usize])
            .collect()
    }
}

impl fmt::Display for Tonality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", PITCH_CLASS_NAMES[self.tonic as usize], self.mode)
    }
}

pub fn pitch_class(pitch: i32) -> u8 {
    pitch.rem_euclid(12) as u8
}

/// Every pitch in the usable register with pitch class `pc`.
pub fn pitches_of_class(pc: u8) -> Vec<i32> {
    (REGISTER_LOW..=REGISTER_HIGH)
        .filter(|&p| pitch_class(p) == pc % 12)
        .collect()
}

const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

/// Parse a note name without octave ("C", "F#", "Bb", "eb") to a pitch
/// class.
pub fn parse_pitch_class(name: &str) -> Result<u8, HarmonyError> {
    let mut chars = name.trim().chars();
    let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => {
            return Err(HarmonyError::InvalidTonality(format!(
                "unknown note name '{name}'"
            )));
        }
    };
    let mut pc: i32 = base;
    for c in chars {
        match c {
            '#' => pc += 1,
            'b' => pc -= 1,
            _ => {
                return Err(HarmonyError::InvalidTonality(format!(
                    "unknown note name '{name}'"
                )));
            }
        }
    }
    Ok(pc.rem_euclid(12) as u8)
}

/// Scientific pitch name, with MIDI 60 = C4.
pub fn note_name(pitch: i32) -> String {
    let octave = pitch.div_euclid(12) - 1;
    format!("{}{}", PITCH_CLASS_NAMES[pitch_class(pitch) as usize], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c_major() -> Tonality {
        Tonality::new(0, Mode::Major).unwrap()
    }

    fn a_minor() -> Tonality {
        Tonality::new(9, Mode::Minor).unwrap()
    }

    #[test]
    fn test_tonic_out_of_range() {
        assert!(matches!(
            Tonality::new(12, Mode::Major),
            Err(HarmonyError::InvalidTonality(_))
        ));
    }

    #[test]
    fn test_degree_pitch_classes() {
        let key = c_major();
        let pcs: Vec<u8> = (0..7).map(|d| key.degree_pitch_class(d)).collect();
        assert_eq!(pcs, vec![0, 2, 4, 5, 7, 9, 11]);
        // A harmonic minor: G# leading tone.
        assert_eq!(a_minor().degree_pitch_class(6), 8);
    }

    #[test]
    fn test_chord_pitch_classes() {
        let key = c_major();
        assert_eq!(key.chord_pitch_classes(4, ChordQuality::DominantSeventh), vec![7, 11, 2, 5]);
        assert_eq!(key.chord_pitch_classes(6, ChordQuality::Diminished), vec![11, 2, 5]);
        // E major in A minor.
        assert_eq!(a_minor().chord_pitch_classes(4, ChordQuality::Major), vec![4, 8, 11]);
    }

    #[test]
    fn test_diatonic_qualities() {
        assert_eq!(Mode::Major.diatonic_quality(1), ChordQuality::Minor);
        assert_eq!(Mode::Major.diatonic_quality(6), ChordQuality::Diminished);
        assert_eq!(Mode::Minor.diatonic_quality(2), ChordQuality::Augmented);
        assert_eq!(Mode::Minor.diatonic_quality(4), ChordQuality::Major);
    }

    #[test]
    fn test_diatonic_triads_stay_in_key() {
        for key in [c_major(), a_minor()] {
            for degree in 0..7 {
                let quality = key.mode().diatonic_quality(degree);
                for pc in key.chord_pitch_classes(degree, quality) {
                    assert!(key.contains_pitch_class(pc), "{key} degree {degree}");
                }
            }
        }
    }

    #[test]
    fn test_chord_tones_cover_register() {
        let tones = c_major().chord_tones(0, ChordQuality::Major);
        assert!(tones.contains(&60));
        assert!(tones.contains(&64));
        assert!(tones.contains(&67));
        assert!(!tones.contains(&62));
        assert!(tones.iter().all(|&p| (REGISTER_LOW..=REGISTER_HIGH).contains(&p)));
    }

    #[test]
    fn test_classify() {
        let key = c_major();
        assert_eq!(key.classify(60), NoteClass::Tonal); // C
        assert_eq!(key.classify(65), NoteClass::Tonal); // F
        assert_eq!(key.classify(67), NoteClass::Tonal); // G
        assert_eq!(key.classify(64), NoteClass::Modal); // E
        assert_eq!(key.classify(71), NoteClass::Modal); // B
        assert_eq!(key.classify(62), NoteClass::Other); // D
        assert_eq!(key.classify(61), NoteClass::Other); // C#
    }

    #[test]
    fn test_reference_note_and_scale_notes() {
        let key = Tonality::new(2, Mode::Major).unwrap();
        assert_eq!(key.degree_reference_note(0), 62);
        assert_eq!(key.degree_reference_note(4), 69);
        assert_eq!(key.scale_degree_notes(6), vec![1]);
    }

    #[test]
    fn test_all_notes_in_key() {
        let notes = a_minor().all_notes();
        assert!(notes.contains(&68)); // G#
        assert!(!notes.contains(&67)); // G natural is outside harmonic minor
    }

    #[test]
    fn test_parse_pitch_class() {
        assert_eq!(parse_pitch_class("C").unwrap(), 0);
        assert_eq!(parse_pitch_class("f#").unwrap(), 6);
        assert_eq!(parse_pitch_class("Bb").unwrap(), 10);
        assert_eq!(parse_pitch_class("Cb").unwrap(), 11);
        assert!(parse_pitch_class("H").is_err());
        assert!(parse_pitch_class("Cx").is_err());
    }

    #[test]
    fn test_note_name() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(47), "B2");
        assert_eq!(note_name(70), "Bb4");
    }

    #[test]
    fn test_quality_parsing() {
        assert_eq!("dom7".parse::<ChordQuality>().unwrap(), ChordQuality::DominantSeventh);
        assert_eq!("m".parse::<ChordQuality>().unwrap(), ChordQuality::Minor);
        assert!("sus4".parse::<ChordQuality>().is_err());
        assert!("Minor".parse::<Mode>().is_ok());
    }
}
