// MIDI output for finished voicings.
//
// Writes a Standard MIDI File, format 1: a tempo track followed by one track
// per voice, soprano first, each on its own channel with the choir-aahs
// program. Every chord lasts `chord_ticks` (480 ticks per quarter note).
// A voice that keeps its pitch from one chord to the next is held rather
// than re-attacked, so common tones sound tied.
//
// Uses the `midly` crate.

use std::path::Path;

use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};

use crate::config::HarmonyConfig;
use crate::error::HarmonyError;
use crate::harmonizer::Voicing;
use crate::network::Voice;

/// Ticks per quarter note in MIDI output.
pub const TICKS_PER_QUARTER: u16 = 480;

const CHOIR_AAHS: u8 = 52;
const VELOCITY: u8 = 80;

/// Render `voicing` and write it to `path`.
pub fn write_midi(voicing: &Voicing, config: &HarmonyConfig, path: &Path) -> Result<(), HarmonyError> {
    let bytes = render_midi(voicing, config)?;
    std::fs::write(path, &bytes)?;
    Ok(())
}

/// Render `voicing` to SMF bytes.
pub fn render_midi(voicing: &Voicing, config: &HarmonyConfig) -> Result<Vec<u8>, HarmonyError> {
    config.validate()?;
    if let Some(&bad) = voicing.chords.iter().flatten().find(|p| !(0..=127).contains(*p)) {
        return Err(HarmonyError::Midi(format!("pitch {bad} is not a MIDI note")));
    }
    let smf = voicing_to_smf(voicing, config);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

fn voicing_to_smf(voicing: &Voicing, config: &HarmonyConfig) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    let tempo_microseconds = 60_000_000 / config.tempo_bpm as u32;
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
        },
        end_of_track(0),
    ]);

    for (channel, voice) in Voice::ALL.iter().rev().enumerate() {
        smf.tracks
            .push(voice_track(voicing, *voice, u4::new(channel as u8), config.chord_ticks));
    }
    smf
}

fn voice_track(voicing: &Voicing, voice: Voice, channel: u4, chord_ticks: u32) -> Track<'static> {
    let mut track: Track<'static> = vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(voice_label(voice).as_bytes())),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(CHOIR_AAHS),
                },
            },
        },
    ];

    let midi = |message| TrackEventKind::Midi { channel, message };
    let mut sounding: Option<u8> = None;
    let mut pending: u32 = 0;
    for pitch in voicing.voice_line(voice) {
        let pitch = pitch as u8;
        if sounding != Some(pitch) {
            if let Some(previous) = sounding.take() {
                track.push(TrackEvent {
                    delta: u28::new(pending),
                    kind: midi(MidiMessage::NoteOff {
                        key: u7::new(previous),
                        vel: u7::new(0),
                    }),
                });
                pending = 0;
            }
            track.push(TrackEvent {
                delta: u28::new(pending),
                kind: midi(MidiMessage::NoteOn {
                    key: u7::new(pitch),
                    vel: u7::new(VELOCITY),
                }),
            });
            sounding = Some(pitch);
        }
        pending += chord_ticks;
    }
    if let Some(last) = sounding {
        track.push(TrackEvent {
            delta: u28::new(pending),
            kind: midi(MidiMessage::NoteOff {
                key: u7::new(last),
                vel: u7::new(0),
            }),
        });
        pending = 0;
    }
    track.push(end_of_track(pending));
    track
}

fn voice_label(voice: Voice) -> &'static str {
    match voice {
        Voice::Bass => "Bass",
        Voice::Tenor => "Tenor",
        Voice::Alto => "Alto",
        Voice::Soprano => "Soprano",
    }
}

fn end_of_track(delta: u32) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadence() -> Voicing {
        Voicing {
            chords: vec![[48, 55, 64, 72], [43, 55, 62, 71], [48, 55, 64, 72]],
        }
    }

    fn note_ons(track: &Track<'_>) -> Vec<u8> {
        track
            .iter()
            .filter_map(|event| match event.kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { key, .. },
                    ..
                } => Some(key.as_int()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_track_layout() {
        let smf = voicing_to_smf(&cadence(), &HarmonyConfig::default());
        // Tempo track + 4 voices.
        assert_eq!(smf.tracks.len(), 5);
        assert_eq!(note_ons(&smf.tracks[1]), vec![72, 71, 72]);
        assert_eq!(note_ons(&smf.tracks[4]), vec![48, 43, 48]);
    }

    #[test]
    fn test_held_note_is_not_reattacked() {
        let smf = voicing_to_smf(&cadence(), &HarmonyConfig::default());
        // The tenor sits on G3 throughout: one attack, one release at the end.
        let tenor = &smf.tracks[3];
        assert_eq!(note_ons(tenor), vec![55]);
        let total: u32 = tenor.iter().map(|e| e.delta.as_int()).sum();
        assert_eq!(total, 3 * 960);
    }

    #[test]
    fn test_write_and_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.mid");
        write_midi(&cadence(), &HarmonyConfig::default(), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 5);
        assert_eq!(smf.header.timing, Timing::Metrical(u15::new(TICKS_PER_QUARTER)));
    }

    #[test]
    fn test_out_of_range_pitch_is_rejected() {
        let voicing = Voicing {
            chords: vec![[48, 55, 64, 130]],
        };
        assert!(matches!(
            render_midi(&voicing, &HarmonyConfig::default()),
            Err(HarmonyError::Midi(_))
        ));
    }
}
