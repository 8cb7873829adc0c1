// Finite integer domains stored as bitsets.
//
// A `Domain` is the set of values a variable may still take. Bit `k` of the
// word vector stands for the value `offset + k`, so domains with holes (chord
// tones spread over several octaves, interval sets like {-12, 0, 12}) cost no
// more than plain ranges. Size, minimum and maximum are cached and refreshed
// after every mutation; propagators read them far more often than they write.
//
// Domains only ever shrink. Every mutating method returns `true` when it
// removed at least one value, which is how the space decides which
// propagators to wake up.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    offset: i32,
    words: Vec<u64>,
    size: u32,
    min: i32,
    max: i32,
}

impl Domain {
    /// The closed range `[lo, hi]`. Empty when `lo > hi`.
    pub fn range(lo: i32, hi: i32) -> Self {
        if lo > hi {
            return Self::empty();
        }
        let len = (hi as i64 - lo as i64 + 1) as usize;
        let mut words = vec![u64::MAX; len.div_ceil(64)];
        let tail = len % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Self {
            offset: lo,
            words,
            size: len as u32,
            min: lo,
            max: hi,
        }
    }

    /// Exactly the given values (duplicates ignored, order irrelevant).
    pub fn from_values(values: impl IntoIterator<Item = i32>) -> Self {
        let values: Vec<i32> = values.into_iter().collect();
        let (Some(&lo), Some(&hi)) = (values.iter().min(), values.iter().max()) else {
            return Self::empty();
        };
        let len = (hi as i64 - lo as i64 + 1) as usize;
        let mut dom = Self {
            offset: lo,
            words: vec![0; len.div_ceil(64)],
            size: 0,
            min: lo,
            max: hi,
        };
        for v in values {
            let (w, b) = dom.slot(v);
            dom.words[w] |= 1u64 << b;
        }
        dom.refresh();
        dom
    }

    pub fn singleton(value: i32) -> Self {
        Self::range(value, value)
    }

    pub fn empty() -> Self {
        Self {
            offset: 0,
            words: Vec::new(),
            size: 0,
            min: 0,
            max: -1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Smallest remaining value. Meaningless on an empty domain.
    pub fn min(&self) -> i32 {
        self.min
    }

    /// Largest remaining value. Meaningless on an empty domain.
    pub fn max(&self) -> i32 {
        self.max
    }

    pub fn is_fixed(&self) -> bool {
        self.size == 1
    }

    /// The single remaining value, if the domain is fixed.
    pub fn value(&self) -> Option<i32> {
        self.is_fixed().then_some(self.min)
    }

    pub fn contains(&self, value: i32) -> bool {
        if self.is_empty() || value < self.min || value > self.max {
            return false;
        }
        let (w, b) = self.slot(value);
        self.words[w] & (1u64 << b) != 0
    }

    /// Remaining values in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        let offset = self.offset;
        self.words
            .iter()
            .enumerate()
            .flat_map(move |(wi, &word)| {
                SetBits { word }.map(move |bit| offset + (wi as i32) * 64 + bit as i32)
            })
    }

    /// The value at position `index` in ascending order.
    pub fn nth(&self, index: usize) -> Option<i32> {
        self.iter().nth(index)
    }

    /// True if every value of `self` is also in `other`.
    pub fn is_subset_of(&self, other: &Domain) -> bool {
        self.iter().all(|v| other.contains(v))
    }

    /// True if `self` and `other` share at least one value.
    pub fn intersects(&self, other: &Domain) -> bool {
        if self.is_empty() || other.is_empty() || self.max < other.min || other.max < self.min {
            return false;
        }
        self.iter().any(|v| other.contains(v))
    }

    pub fn remove(&mut self, value: i32) -> bool {
        if !self.contains(value) {
            return false;
        }
        let (w, b) = self.slot(value);
        self.words[w] &= !(1u64 << b);
        self.refresh();
        true
    }

    /// Keep only the values for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(i32) -> bool) -> bool {
        let doomed: Vec<i32> = self.iter().filter(|&v| !keep(v)).collect();
        if doomed.is_empty() {
            return false;
        }
        for v in doomed {
            let (w, b) = self.slot(v);
            self.words[w] &= !(1u64 << b);
        }
        self.refresh();
        true
    }

    pub fn intersect(&mut self, other: &Domain) -> bool {
        self.retain(|v| other.contains(v))
    }

    pub fn subtract(&mut self, other: &Domain) -> bool {
        self.retain(|v| !other.contains(v))
    }

    /// Drop every value below `lo`.
    pub fn restrict_min(&mut self, lo: i32) -> bool {
        if self.is_empty() || lo <= self.min {
            return false;
        }
        self.retain(|v| v >= lo)
    }

    /// Drop every value above `hi`.
    pub fn restrict_max(&mut self, hi: i32) -> bool {
        if self.is_empty() || hi >= self.max {
            return false;
        }
        self.retain(|v| v <= hi)
    }

    /// Reduce to the single value `value` (or to nothing if absent).
    pub fn fix(&mut self, value: i32) -> bool {
        if self.is_fixed() && self.min == value {
            return false;
        }
        self.retain(|v| v == value)
    }

    fn slot(&self, value: i32) -> (usize, u32) {
        let idx = (value as i64 - self.offset as i64) as usize;
        (idx / 64, (idx % 64) as u32)
    }

    fn refresh(&mut self) {
        self.size = self.words.iter().map(|w| w.count_ones()).sum();
        let first = self
            .words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i as i32 * 64 + w.trailing_zeros() as i32);
        let last = self
            .words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i as i32 * 64 + 63 - w.leading_zeros() as i32);
        match (first, last) {
            (Some(f), Some(l)) => {
                self.min = self.offset + f;
                self.max = self.offset + l;
            }
            _ => {
                self.min = 0;
                self.max = -1;
            }
        }
    }
}

/// Iterates the indices of set bits in one word, lowest first.
struct SetBits {
    word: u64,
}

impl Iterator for SetBits {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.word == 0 {
            return None;
        }
        let bit = self.word.trailing_zeros();
        self.word &= self.word - 1;
        Some(bit)
    }
}
