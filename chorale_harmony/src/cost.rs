// The five-component cost vector, minimized lexicographically.
//
//   0  fundamental-state diminished triads sounding four distinct pitches
//   1  chords sounding fewer than four distinct pitches
//   2  fundamental major/minor triads with an undoubled root
//   3  total melodic motion in semitones, all voices
//   4  transitions out of a first-inversion chord where the soprano does
//      not keep its pitch class
//
// Every component is a solver variable defined by exact constraints over
// the network, so a bound on the vector prunes during search and the value
// read from a solution is the realized cost.

use std::fmt;

use chorale_search::{Assignment, Rel, Space, VarId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::harmonic::{DoublingRule, HarmonicConstraintSet};
use crate::network::{Voice, VoicingNetwork};
use crate::progression::{ChordState, ResolvedChord};
use crate::tonality::ChordQuality;

pub const COST_NAMES: [&str; 5] = [
    "four-note diminished",
    "unison chords",
    "undoubled roots",
    "melodic motion",
    "soprano leaves inversion",
];

/// Realized costs, most significant first. Ordered lexicographically.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CostVector(pub [i32; 5]);

impl CostVector {
    /// `None` unless `values` has exactly five components.
    pub fn from_slice(values: &[i32]) -> Option<Self> {
        let array: [i32; 5] = values.try_into().ok()?;
        Some(CostVector(array))
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    pub fn dominates(&self, other: &CostVector) -> bool {
        self < other
    }
}

impl fmt::Display for CostVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in COST_NAMES.iter().zip(self.0).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CostModel {
    components: [VarId; 5],
}

impl CostModel {
    pub fn post(
        space: &mut Space,
        net: &VoicingNetwork,
        chords: &[ResolvedChord],
        harmonic: &HarmonicConstraintSet,
    ) -> Self {
        let n = chords.len();

        let mut four_note_diminished = Vec::new();
        let mut unisons = Vec::with_capacity(n);
        let mut undoubled_roots = Vec::new();
        for (i, chord) in chords.iter().enumerate() {
            let distinct = space.nvalues(&net.chord_notes(i));
            if chord.quality == ChordQuality::Diminished && chord.state == ChordState::Fundamental {
                four_note_diminished.push(space.reify_linear(&[(1, distinct)], Rel::Ge, 4));
            }
            unisons.push(space.reify_linear(&[(1, distinct)], Rel::Le, 3));
            if harmonic.rule(i) == DoublingRule::RootDoubled {
                let rc = harmonic.root_count(i);
                undoubled_roots.push(space.reify_linear(&[(1, rc)], Rel::Le, 1));
            }
        }

        let c1 = space.sum(&four_note_diminished);
        let c2 = space.sum(&unisons);
        let c3 = space.sum(&undoubled_roots);
        let c4 = space.sum(&net.all_abs_melodic());

        // c5 = eligible − kept, with kept counted by indicators.
        let mut terms = Vec::new();
        for (i, chord) in chords.iter().enumerate().take(n.saturating_sub(1)) {
            if chord.state == ChordState::First {
                let kept = space.reify_member(net.melodic(Voice::Soprano, i), [-12, 0, 12]);
                terms.push((1, kept));
            }
        }
        let eligible = terms.len() as i32;
        let c5 = space.aux_var(0, eligible);
        terms.push((1, c5));
        space.linear(&terms, Rel::Eq, eligible);

        debug!(
            diminished = four_note_diminished.len(),
            root_doubling_candidates = undoubled_roots.len(),
            inversion_exits = eligible,
            "cost model posted"
        );
        CostModel {
            components: [c1, c2, c3, c4, c5],
        }
    }

    /// The components in priority order, for `Space::minimize_lex`.
    pub fn objective(&self) -> Vec<VarId> {
        self.components.to_vec()
    }

    pub fn read(&self, assignment: &Assignment) -> CostVector {
        CostVector(self.components.map(|c| assignment.value(c)))
    }
}
