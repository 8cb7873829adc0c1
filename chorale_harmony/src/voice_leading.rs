// Rules between consecutive chords.
//
// Each transition i → i+1 gets, in order:
// 1. The parallel-interval ban, unless both chords share a degree. No voice
//    pair may hold the same perfect interval class (unison/octave or fifth)
//    at both chords while both voices move in the same direction.
// 2. Exactly one motion rule, picked by `transition_rule`:
//    - `DeceptiveCadence` (V → vi, both in fundamental state): every upper
//      voice moves by a fixed table keyed on the pitch class it leaves.
//    - `ContraryMotion` (bass steps between two fundamental-state chords, or
//      ii → V in any state): the upper voices move against the bass.
//    - `CommonTones` (any other change of degree): at least one pitch class
//      the two chords share is held by a voice that sounds it.
//    - `Repeat` (same degree twice): nothing.
//
// The dominant-seventh tritone is not required to resolve.

use chorale_search::{Rel, Space};
use tracing::debug;

use crate::network::{VOICE_PAIRS, Voice, VoicingNetwork};
use crate::progression::{ChordState, ResolvedChord};
use crate::tonality::{TonalityModel, pitch_class};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRule {
    Repeat,
    DeceptiveCadence,
    ContraryMotion,
    CommonTones,
}

pub fn transition_rule(from: &ResolvedChord, to: &ResolvedChord) -> TransitionRule {
    let both_fundamental = from.state == ChordState::Fundamental && to.state == ChordState::Fundamental;
    if from.degree == to.degree {
        return TransitionRule::Repeat;
    }
    if both_fundamental && from.degree == 4 && to.degree == 5 {
        return TransitionRule::DeceptiveCadence;
    }
    let bass_step = (to.bass_pitch_class() as i32 - from.bass_pitch_class() as i32).rem_euclid(12);
    if (both_fundamental && matches!(bass_step, 1 | 2 | 10 | 11)) || (from.degree == 1 && to.degree == 4) {
        return TransitionRule::ContraryMotion;
    }
    TransitionRule::CommonTones
}

#[derive(Debug, Clone)]
pub struct VoiceLeadingConstraintSet {
    rules: Vec<TransitionRule>,
}

impl VoiceLeadingConstraintSet {
    pub fn post(
        space: &mut Space,
        net: &VoicingNetwork,
        chords: &[ResolvedChord],
        key: &dyn TonalityModel,
    ) -> Self {
        let mut rules = Vec::with_capacity(chords.len().saturating_sub(1));
        for (i, pair) in chords.windows(2).enumerate() {
            let (from, to) = (&pair[0], &pair[1]);
            let rule = transition_rule(from, to);
            if rule != TransitionRule::Repeat {
                post_no_parallels(space, net, i);
            }
            match rule {
                TransitionRule::Repeat => {}
                TransitionRule::DeceptiveCadence => post_deceptive_cadence(space, net, i, key),
                TransitionRule::ContraryMotion => post_contrary_motion(space, net, i),
                TransitionRule::CommonTones => {
                    post_common_tone(space, net, i, &from.shares_pitch_classes_with(to));
                }
            }
            rules.push(rule);
        }
        debug!(
            transitions = rules.len(),
            propagators = space.num_propagators(),
            "voice-leading rules posted"
        );
        VoiceLeadingConstraintSet { rules }
    }

    /// The motion rule chosen for transition `i → i + 1`.
    pub fn rule(&self, i: usize) -> TransitionRule {
        self.rules[i]
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }
}

/// True when a voice pair moves in similar motion between two perfect
/// consonances of the same class.
pub fn is_parallel_perfect(before: i32, after: i32, lower_step: i32, upper_step: i32) -> bool {
    let class = before.rem_euclid(12);
    matches!(class, 0 | 7)
        && after.rem_euclid(12) == class
        && lower_step.signum() * upper_step.signum() > 0
}

fn post_no_parallels(space: &mut Space, net: &VoicingNetwork, i: usize) {
    for (p, pair) in VOICE_PAIRS.iter().enumerate() {
        let vars = [
            net.harmonic(p, i),
            net.harmonic(p, i + 1),
            net.melodic(pair.lower, i),
            net.melodic(pair.upper, i),
        ];
        space.check("no parallel perfect intervals", &vars, |v| {
            !is_parallel_perfect(v[0], v[1], v[2], v[3])
        });
    }
}

/// Permitted motions for an upper voice leaving `pc` in V → vi.
fn cadence_motions(pc: u8, key: &dyn TonalityModel) -> &'static [i32] {
    let degree_pc = |degree: u8| pitch_class(key.degree_reference_note(degree));
    if pc == degree_pc(6) {
        &[1]
    } else if pc == degree_pc(1) || pc == degree_pc(3) {
        &[-2, -1]
    } else if pc == degree_pc(4) {
        &[-4, -3]
    } else {
        &[]
    }
}

fn post_deceptive_cadence(space: &mut Space, net: &VoicingNetwork, i: usize, key: &dyn TonalityModel) {
    let table: Vec<&'static [i32]> = (0..12u8).map(|pc| cadence_motions(pc, key)).collect();
    for voice in Voice::UPPER {
        let table = table.clone();
        let vars = [net.note(voice, i), net.melodic(voice, i)];
        space.check("deceptive cadence motion", &vars, move |v| {
            table[pitch_class(v[0]) as usize].contains(&v[1])
        });
    }
}

fn post_contrary_motion(space: &mut Space, net: &VoicingNetwork, i: usize) {
    let bass = net.melodic(Voice::Bass, i);
    let bass_down = space.reify_linear(&[(1, bass)], Rel::Le, -1);
    let bass_up = space.reify_linear(&[(1, bass)], Rel::Ge, 1);
    for voice in Voice::UPPER {
        let m = net.melodic(voice, i);
        let up = space.reify_linear(&[(1, m)], Rel::Ge, 1);
        let down = space.reify_linear(&[(1, m)], Rel::Le, -1);
        space.implies(bass_down, up);
        space.implies(bass_up, down);
    }
}

/// Some voice sounds one of the `shared` pitch classes in chord `i` and keeps
/// its pitch into chord `i + 1`. Nothing is posted when the chords share no
/// pitch class.
fn post_common_tone(space: &mut Space, net: &VoicingNetwork, i: usize, shared: &[u8]) {
    if shared.is_empty() {
        return;
    }
    let mut held = Vec::with_capacity(Voice::ALL.len() * shared.len());
    for voice in Voice::ALL {
        let stays = space.reify_member(net.melodic(voice, i), [0]);
        for &pc in shared {
            let sounds = space.reify_linear(&[(1, net.pitch_class(voice, i))], Rel::Eq, pc as i32);
            held.push((1, space.conjunction(&[sounds, stays])));
        }
    }
    space.linear(&held, Rel::Ge, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RootDoubling, VoiceRanges};
    use crate::harmonic::HarmonicConstraintSet;
    use crate::progression::Progression;
    use crate::tonality::{Mode, Tonality};
    use chorale_search::{SearchOptions, SolveMode, ValueSelection, solve};

    fn c_major() -> Tonality {
        Tonality::new(0, Mode::Major).unwrap()
    }

    fn resolve(tokens: &[&str]) -> Vec<ResolvedChord> {
        Progression::parse(tokens).unwrap().resolve(&c_major()).unwrap()
    }

    fn model(tokens: &[&str]) -> (Space, VoicingNetwork, VoiceLeadingConstraintSet) {
        let key = c_major();
        let chords = resolve(tokens);
        let mut space = Space::new();
        let net = VoicingNetwork::build(&mut space, chords.len(), &key, &VoiceRanges::default())
            .unwrap();
        HarmonicConstraintSet::post(&mut space, &net, &chords, &key, RootDoubling::Soft);
        let rules = VoiceLeadingConstraintSet::post(&mut space, &net, &chords, &key);
        (space, net, rules)
    }

    fn sample(space: Space, seed: u64) -> Vec<chorale_search::Assignment> {
        let options = SearchOptions {
            value_selection: ValueSelection::Random,
            seed,
            ..SearchOptions::default()
        };
        solve(space, SolveMode::AllSolutions, options)
            .unwrap()
            .take(40)
            .map(|s| s.assignment)
            .collect()
    }

    #[test]
    fn test_transition_table() {
        let chords = resolve(&["0:0", "0:1", "3:0", "4:0", "5:0", "1:1", "4:1", "0:0"]);
        let rules: Vec<TransitionRule> =
            chords.windows(2).map(|w| transition_rule(&w[0], &w[1])).collect();
        assert_eq!(
            rules,
            vec![
                TransitionRule::Repeat,           // I → I6
                TransitionRule::CommonTones,      // I6 → IV
                TransitionRule::ContraryMotion,   // IV → V, F to G
                TransitionRule::DeceptiveCadence, // V → vi
                TransitionRule::CommonTones,      // vi → ii6
                TransitionRule::ContraryMotion,   // ii6 → V6
                TransitionRule::CommonTones,      // V6 → I
            ]
        );
    }

    #[test]
    fn test_parallel_detection() {
        assert!(is_parallel_perfect(7, 7, 2, 2));
        assert!(is_parallel_perfect(12, 24, -1, -3));
        assert!(!is_parallel_perfect(7, 7, 2, -2));
        assert!(!is_parallel_perfect(7, 7, 0, 2));
        assert!(!is_parallel_perfect(7, 12, 1, 1)); // fifth to octave
        assert!(!is_parallel_perfect(4, 4, 1, 1));
    }

    #[test]
    fn test_no_parallels_in_solutions() {
        let (space, net, _) = model(&["0:0", "4:0"]);
        let solutions = sample(space, 11);
        assert!(!solutions.is_empty());
        for a in &solutions {
            for pair in VOICE_PAIRS {
                let lo = [a.value(net.note(pair.lower, 0)), a.value(net.note(pair.lower, 1))];
                let hi = [a.value(net.note(pair.upper, 0)), a.value(net.note(pair.upper, 1))];
                assert!(!is_parallel_perfect(
                    hi[0] - lo[0],
                    hi[1] - lo[1],
                    lo[1] - lo[0],
                    hi[1] - hi[0]
                ));
            }
        }
    }

    #[test]
    fn test_contrary_motion_against_bass() {
        let (space, net, rules) = model(&["3:0", "4:0"]);
        assert_eq!(rules.rule(0), TransitionRule::ContraryMotion);
        for a in sample(space, 5) {
            let bass = a.value(net.melodic(Voice::Bass, 0));
            for voice in Voice::UPPER {
                let m = a.value(net.melodic(voice, 0));
                assert!(bass.signum() * m.signum() < 0, "bass {bass}, {voice} {m}");
            }
        }
    }

    #[test]
    fn test_deceptive_cadence_motions() {
        let (space, net, _) = model(&["4:0", "5:0"]);
        let solutions = sample(space, 2);
        assert!(!solutions.is_empty());
        for a in solutions {
            for voice in Voice::UPPER {
                let from = a.value(net.note(voice, 0)).rem_euclid(12);
                let m = a.value(net.melodic(voice, 0));
                match from {
                    11 => assert_eq!(m, 1),
                    2 => assert!(m == -1 || m == -2),
                    7 => assert!(m == -3 || m == -4),
                    other => panic!("{voice} leaves unexpected pitch class {other}"),
                }
            }
        }
    }

    #[test]
    fn test_common_tone_is_held() {
        let (space, net, rules) = model(&["0:0", "4:0"]);
        assert_eq!(rules.rule(0), TransitionRule::CommonTones);
        for a in sample(space, 9) {
            let held = Voice::ALL.iter().any(|&v| {
                a.value(net.note(v, 0)).rem_euclid(12) == 7 && a.value(net.melodic(v, 0)) == 0
            });
            assert!(held);
        }
    }
}
