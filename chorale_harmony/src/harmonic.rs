// Per-chord harmonic rules.
//
// For every chord position:
// - all four notes are chord tones of the chord's (degree, quality);
// - the bass carries the tone selected by the inversion state;
// - every chord tone sounds at least once (completeness);
// - doubling follows a table keyed by quality, state and degree (see
//   `doubling_rule`);
// - a diminished triad always sounds exactly three distinct pitch classes.
//
// The root count of every chord is kept as a solver variable: doubling rules
// read it and the cost model charges undoubled roots.
//
// The first-inversion frame rule is the one rule here that looks across
// chords. Around a first-inversion chord that is neither tonal-third nor
// leading-tone, "bass climbs by step into and out of the chord while the
// soprano falls by step into and out of it" holds exactly when the root is
// doubled. It is posted as a pair of indicator equivalences, since the
// motion is unknown until search.

use chorale_search::{Rel, Space, VarId};
use tracing::debug;

use crate::config::RootDoubling;
use crate::network::{Voice, VoicingNetwork};
use crate::progression::{ChordState, ResolvedChord};
use crate::tonality::{ChordQuality, NoteClass, TonalityModel};
use crate::voice_leading::{TransitionRule, transition_rule};

/// The doubling policy for one chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoublingRule {
    /// Fundamental-state major or minor triad: the root should be doubled.
    /// A cost by default, a hard rule under `RootDoubling::Strict`.
    RootDoubled,
    /// The third sounds exactly twice. First-inversion triads with a tonal
    /// third, and the leading-tone triad in fundamental or first inversion.
    ThirdDoubled,
    /// First-inversion triad otherwise: root doubled iff the outer voices
    /// frame the chord in contrary stepwise motion.
    OuterVoiceFrame,
    /// Completeness only (inversions of seventh chords, second inversions,
    /// fundamental augmented and non-leading-tone diminished triads).
    Free,
}

/// Look up the doubling policy for `chord`.
pub fn doubling_rule(chord: &ResolvedChord, key: &dyn TonalityModel) -> DoublingRule {
    let leading_tone_triad = chord.quality == ChordQuality::Diminished && chord.degree == 6;
    match chord.state {
        ChordState::Fundamental if chord.quality.is_consonant_triad() => DoublingRule::RootDoubled,
        ChordState::Fundamental if leading_tone_triad => DoublingRule::ThirdDoubled,
        ChordState::First if !chord.quality.is_seventh() => {
            let tonal_third = key.classify(chord.third() as i32) == NoteClass::Tonal;
            if tonal_third || leading_tone_triad {
                DoublingRule::ThirdDoubled
            } else {
                DoublingRule::OuterVoiceFrame
            }
        }
        _ => DoublingRule::Free,
    }
}

#[derive(Debug, Clone)]
pub struct HarmonicConstraintSet {
    rules: Vec<DoublingRule>,
    root_counts: Vec<VarId>,
}

impl HarmonicConstraintSet {
    pub fn post(
        space: &mut Space,
        net: &VoicingNetwork,
        chords: &[ResolvedChord],
        key: &dyn TonalityModel,
        root_doubling: RootDoubling,
    ) -> Self {
        let n = chords.len();
        let mut rules = Vec::with_capacity(n);
        let mut root_counts = Vec::with_capacity(n);

        for (i, chord) in chords.iter().enumerate() {
            let notes = net.chord_notes(i);
            let pcs = net.chord_pitch_classes(i);

            let tones = key.chord_tones(chord.degree, chord.quality);
            for note in notes {
                space.restrict(note, tones.iter().copied());
            }
            space.restrict(net.pitch_class(Voice::Bass, i), [chord.bass_pitch_class() as i32]);
            for &tone in &chord.tones {
                space.count(&pcs, [tone as i32], Rel::Ge, 1);
            }

            let root_count = space.count_var(&pcs, [chord.root() as i32]);
            let rule = doubling_rule(chord, key);
            match rule {
                DoublingRule::RootDoubled => {
                    let closes_cadence = i > 0
                        && transition_rule(&chords[i - 1], chord) == TransitionRule::DeceptiveCadence;
                    if root_doubling == RootDoubling::Strict && !closes_cadence {
                        space.linear(&[(1, root_count)], Rel::Eq, 2);
                    }
                }
                DoublingRule::ThirdDoubled => {
                    space.count(&pcs, [chord.third() as i32], Rel::Eq, 2);
                }
                DoublingRule::OuterVoiceFrame if i > 0 && i + 1 < n => {
                    post_outer_voice_frame(space, net, i, root_count);
                }
                DoublingRule::OuterVoiceFrame => {
                    space.linear(&[(1, root_count)], Rel::Eq, 1);
                }
                DoublingRule::Free => {}
            }

            if chord.quality == ChordQuality::Diminished {
                let distinct = space.nvalues(&pcs);
                space.linear(&[(1, distinct)], Rel::Eq, 3);
            }

            rules.push(rule);
            root_counts.push(root_count);
        }

        debug!(
            chords = n,
            propagators = space.num_propagators(),
            "harmonic rules posted"
        );
        HarmonicConstraintSet { rules, root_counts }
    }

    pub fn rule(&self, i: usize) -> DoublingRule {
        self.rules[i]
    }

    /// Number of voices on the root of chord `i`.
    pub fn root_count(&self, i: usize) -> VarId {
        self.root_counts[i]
    }
}

/// frame ⇔ root doubled, ¬frame ⇔ single root, where frame means the bass
/// rises 1-2 semitones into and out of chord `i` and the soprano falls 1-2
/// semitones into and out of it.
fn post_outer_voice_frame(space: &mut Space, net: &VoicingNetwork, i: usize, root_count: VarId) {
    let steps = [
        space.reify_member(net.melodic(Voice::Bass, i - 1), [1, 2]),
        space.reify_member(net.melodic(Voice::Bass, i), [1, 2]),
        space.reify_member(net.melodic(Voice::Soprano, i - 1), [-2, -1]),
        space.reify_member(net.melodic(Voice::Soprano, i), [-2, -1]),
    ];
    let frame = space.conjunction(&steps);
    let doubled = space.reify_linear(&[(1, root_count)], Rel::Eq, 2);
    let single = space.reify_linear(&[(1, root_count)], Rel::Eq, 1);
    space.equivalent(frame, doubled);
    space.exclusive(frame, single);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoiceRanges;
    use crate::progression::Progression;
    use crate::tonality::{Mode, Tonality};
    use crate::voice_leading::VoiceLeadingConstraintSet;
    use chorale_search::{SearchOptions, SolveMode, solve};

    fn c_major() -> Tonality {
        Tonality::new(0, Mode::Major).unwrap()
    }

    fn resolve(tokens: &[&str]) -> Vec<ResolvedChord> {
        Progression::parse(tokens).unwrap().resolve(&c_major()).unwrap()
    }

    fn model(tokens: &[&str], policy: RootDoubling) -> (Space, VoicingNetwork, HarmonicConstraintSet) {
        let key = c_major();
        let chords = resolve(tokens);
        let mut space = Space::new();
        let net = VoicingNetwork::build(&mut space, chords.len(), &key, &VoiceRanges::default())
            .unwrap();
        let set = HarmonicConstraintSet::post(&mut space, &net, &chords, &key, policy);
        (space, net, set)
    }

    #[test]
    fn test_rule_table() {
        let key = c_major();
        let chords = resolve(&["0:0", "6:0", "6:1", "1:1", "5:1", "0:1", "4:1:dom7", "2:2"]);
        let rules: Vec<DoublingRule> = chords.iter().map(|c| doubling_rule(c, &key)).collect();
        assert_eq!(
            rules,
            vec![
                DoublingRule::RootDoubled,
                DoublingRule::ThirdDoubled,
                DoublingRule::ThirdDoubled,    // vii°6
                DoublingRule::ThirdDoubled,    // ii6, F is tonal
                DoublingRule::ThirdDoubled,    // vi6, C is tonal
                DoublingRule::OuterVoiceFrame, // I6, E is modal
                DoublingRule::Free,
                DoublingRule::Free,
            ]
        );
    }

    #[test]
    fn test_every_note_is_a_chord_tone() {
        let (space, net, _) = model(&["4:1:dom7"], RootDoubling::Soft);
        let pcs = [7, 11, 2, 5];
        for solution in solve(space, SolveMode::AllSolutions, SearchOptions::default()).unwrap() {
            let notes = solution.assignment.values_of(&net.chord_notes(0));
            assert_eq!(notes[0].rem_euclid(12), 11, "B in the bass");
            for pc in pcs {
                assert!(notes.iter().any(|n| n.rem_euclid(12) == pc), "{notes:?} misses {pc}");
            }
        }
    }

    #[test]
    fn test_leading_tone_triad_doubles_third() {
        let (space, net, _) = model(&["6:0"], RootDoubling::Soft);
        let mut seen = 0;
        for solution in solve(space, SolveMode::AllSolutions, SearchOptions::default()).unwrap() {
            let notes = solution.assignment.values_of(&net.chord_notes(0));
            let thirds = notes.iter().filter(|n| n.rem_euclid(12) == 2).count();
            assert_eq!(thirds, 2, "{notes:?}");
            seen += 1;
        }
        assert!(seen > 0);
    }

    #[test]
    fn test_strict_root_doubling() {
        let (space, net, set) = model(&["0:0"], RootDoubling::Strict);
        assert_eq!(set.rule(0), DoublingRule::RootDoubled);
        for solution in solve(space, SolveMode::AllSolutions, SearchOptions::default()).unwrap() {
            let notes = solution.assignment.values_of(&net.chord_notes(0));
            let roots = notes.iter().filter(|n| n.rem_euclid(12) == 0).count();
            assert_eq!(roots, 2, "{notes:?}");
            assert_eq!(solution.assignment.value(set.root_count(0)), 2);
        }
    }

    #[test]
    fn test_frame_rule_at_edges_forces_single_root() {
        let (space, net, set) = model(&["4:1"], RootDoubling::Soft);
        assert_eq!(set.rule(0), DoublingRule::OuterVoiceFrame);
        for solution in solve(space, SolveMode::AllSolutions, SearchOptions::default()).unwrap() {
            let notes = solution.assignment.values_of(&net.chord_notes(0));
            let roots = notes.iter().filter(|n| n.rem_euclid(12) == 7).count();
            assert_eq!(roots, 1, "{notes:?}");
        }
    }

    #[test]
    fn test_frame_rule_inside_progression() {
        let key = c_major();
        let chords = resolve(&["1:0", "0:1", "3:0"]);
        let mut space = Space::new();
        let net = VoicingNetwork::build(&mut space, chords.len(), &key, &VoiceRanges::default())
            .unwrap();
        let set = HarmonicConstraintSet::post(&mut space, &net, &chords, &key, RootDoubling::Soft);
        VoiceLeadingConstraintSet::post(&mut space, &net, &chords, &key);
        assert_eq!(set.rule(1), DoublingRule::OuterVoiceFrame);

        let (mut framed, mut unframed) = (0, 0);
        for solution in solve(space, SolveMode::AllSolutions, SearchOptions::default()).unwrap() {
            let a = &solution.assignment;
            let bass: Vec<i32> = (0..3).map(|i| a.value(net.note(Voice::Bass, i))).collect();
            let soprano: Vec<i32> = (0..3).map(|i| a.value(net.note(Voice::Soprano, i))).collect();
            let frame = (0..2).all(|i| {
                matches!(bass[i + 1] - bass[i], 1 | 2) && matches!(soprano[i + 1] - soprano[i], -2 | -1)
            });
            let roots = a
                .values_of(&net.chord_notes(1))
                .iter()
                .filter(|n| n.rem_euclid(12) == 0)
                .count();
            assert_eq!(roots, if frame { 2 } else { 1 }, "bass {bass:?}, soprano {soprano:?}");
            if frame {
                framed += 1;
            } else {
                unframed += 1;
            }
        }
        assert!(framed > 0);
        assert!(unframed > 0);
    }
}
