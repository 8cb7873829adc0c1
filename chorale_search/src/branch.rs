// Branching heuristics: which variable to decide next and which value to
// try first.
//
// The search tree is binary. At each node the brancher picks an unfixed
// variable x and a value v; the left child posts x = v, the right child
// x ≠ v. Decision variables (those created with `Space::int_var`) are
// considered first. Auxiliary variables are only branched on if they are
// still open once every decision variable is fixed.
//
// `ValueSelection::Random` draws from `BranchRng`, a SplitMix64 stream. The
// same seed on the same model always yields the same tree, so seeded runs
// are reproducible.

use serde::{Deserialize, Serialize};

use crate::space::{Space, VarId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarSelection {
    /// First unfixed variable in declaration order.
    #[default]
    InputOrder,
    /// Fewest remaining values; ties go to declaration order.
    SmallestDomain,
    /// Watched by the most propagators; ties go to declaration order.
    LargestDegree,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSelection {
    #[default]
    Min,
    Max,
    /// The lower median of the remaining values.
    Median,
    /// A uniformly random remaining value.
    Random,
}

/// SplitMix64 (Steele, Lea & Flood, 2014). Small, fast, and fully
/// determined by its seed.
#[derive(Clone, Debug)]
pub struct BranchRng {
    state: u64,
}

impl BranchRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform index in `[0, n)`. Rejection sampling avoids modulo bias.
    pub fn below(&mut self, n: usize) -> usize {
        debug_assert!(n > 0);
        let n = n as u64;
        let zone = u64::MAX - (u64::MAX % n);
        loop {
            let r = self.next_u64();
            if r < zone {
                return (r % n) as usize;
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Brancher {
    pub var_selection: VarSelection,
    pub value_selection: ValueSelection,
}

impl Brancher {
    /// The next decision `(var, value)`, or `None` if every variable is
    /// fixed.
    pub fn choose(&self, space: &Space, rng: &mut BranchRng) -> Option<(VarId, i32)> {
        let var = self.select_var(space)?;
        Some((var, self.select_value(space, var, rng)))
    }

    fn select_var(&self, space: &Space) -> Option<VarId> {
        let open = |v: &VarId| !space.dom(*v).is_fixed();
        let mut decision = space.decisions().iter().copied().filter(open);
        let picked = match self.var_selection {
            VarSelection::InputOrder => decision.next(),
            // min_by_key keeps the first of several minima.
            VarSelection::SmallestDomain => decision.min_by_key(|&v| space.dom(v).size()),
            VarSelection::LargestDegree => {
                decision.min_by_key(|&v| std::cmp::Reverse(space.degree(v)))
            }
        };
        picked.or_else(|| {
            (0..space.num_vars())
                .map(VarId::from_index)
                .find(|v| open(v))
        })
    }

    fn select_value(&self, space: &Space, var: VarId, rng: &mut BranchRng) -> i32 {
        let dom = space.dom(var);
        match self.value_selection {
            ValueSelection::Min => dom.min(),
            ValueSelection::Max => dom.max(),
            ValueSelection::Median => {
                let mid = (dom.size() as usize - 1) / 2;
                dom.nth(mid).unwrap_or(dom.min())
            }
            ValueSelection::Random => {
                let pick = rng.below(dom.size() as usize);
                dom.nth(pick).unwrap_or(dom.min())
            }
        }
    }
}
