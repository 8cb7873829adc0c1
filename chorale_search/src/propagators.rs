// Propagators: the constraints a `Space` knows how to filter.
//
// Each propagator narrows the domains of the variables it watches through a
// `Store` and reports `Failure` when no support is left. The consistency
// level differs per constraint:
//
// - `Linear` / `ReifiedLinear`: bounds consistency on Σ aᵢxᵢ ⋈ c.
// - `Difference`, `Distance`, `Abs`, `Modulo`: domain consistency by support
//   enumeration (the domains involved are a few dozen values at most).
// - `Count`, `NValues`: bound reasoning on the counter plus pruning of the
//   counted variables once the counter is tight.
// - `ReifiedMember`: domain consistency on x ∈ S ⇔ b.
// - `LexLess`: the branch-and-bound bound on the objective vector.
// - `Check`: forward checking of an arbitrary predicate. Filters the last
//   unfixed variable and verifies the tuple once everything is fixed.
//
// Every propagator must detect a violated constraint once all its variables
// are fixed, since a space with all domains fixed is reported as solved.
//
// The second half of the file holds the `impl Space` blocks that post these
// propagators: the vocabulary the model builder speaks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::space::{Failure, PropResult, Space, Store, VarId};

pub trait Propagator: fmt::Debug + Send + Sync {
    /// The variables whose changes wake this propagator.
    fn vars(&self) -> Vec<VarId>;

    fn propagate(&self, store: &mut Store<'_>) -> PropResult;
}

/// Relation between a linear expression and its right-hand side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rel {
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
}

impl Rel {
    /// Rewrite strict relations as non-strict ones over integers.
    fn normalize(self, rhs: i64) -> (Rel, i64) {
        match self {
            Rel::Lt => (Rel::Le, rhs - 1),
            Rel::Gt => (Rel::Ge, rhs + 1),
            other => (other, rhs),
        }
    }

    /// The complement relation, normalized.
    fn negate(self, rhs: i64) -> (Rel, i64) {
        match self {
            Rel::Eq => (Rel::Ne, rhs),
            Rel::Ne => (Rel::Eq, rhs),
            Rel::Le => (Rel::Ge, rhs + 1),
            Rel::Lt => (Rel::Ge, rhs),
            Rel::Ge => (Rel::Le, rhs - 1),
            Rel::Gt => (Rel::Le, rhs),
        }
    }
}

fn floor_div(a: i64, b: i64) -> i64 {
    let d = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) { d - 1 } else { d }
}

fn ceil_div(a: i64, b: i64) -> i64 {
    let d = a / b;
    if a % b != 0 && ((a < 0) == (b < 0)) { d + 1 } else { d }
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

// ---------------------------------------------------------------------------
// Linear
// ---------------------------------------------------------------------------

/// Σ aᵢxᵢ ⋈ rhs with bounds consistency.
#[derive(Debug)]
pub struct Linear {
    terms: Vec<(i64, VarId)>,
    rel: Rel,
    rhs: i64,
}

impl Linear {
    pub fn new(terms: &[(i32, VarId)], rel: Rel, rhs: i32) -> Self {
        let (rel, rhs) = rel.normalize(rhs as i64);
        Self {
            terms: merge_terms(terms),
            rel,
            rhs,
        }
    }
}

/// Combine repeated variables and drop zero coefficients.
fn merge_terms(terms: &[(i32, VarId)]) -> Vec<(i64, VarId)> {
    let mut merged: Vec<(i64, VarId)> = Vec::with_capacity(terms.len());
    for &(a, x) in terms {
        match merged.iter_mut().find(|(_, y)| *y == x) {
            Some(entry) => entry.0 += a as i64,
            None => merged.push((a as i64, x)),
        }
    }
    merged.retain(|&(a, _)| a != 0);
    merged
}

fn term_min(a: i64, x: VarId, store: &Store<'_>) -> i64 {
    if a > 0 {
        a * store.min(x) as i64
    } else {
        a * store.max(x) as i64
    }
}

fn term_max(a: i64, x: VarId, store: &Store<'_>) -> i64 {
    if a > 0 {
        a * store.max(x) as i64
    } else {
        a * store.min(x) as i64
    }
}

/// Σ (sign·aᵢ)xᵢ ≤ rhs.
fn enforce_le(terms: &[(i64, VarId)], sign: i64, rhs: i64, store: &mut Store<'_>) -> PropResult {
    let total_min: i64 = terms.iter().map(|&(a, x)| term_min(sign * a, x, store)).sum();
    if total_min > rhs {
        return Err(Failure);
    }
    for &(a, x) in terms {
        let a = sign * a;
        let slack = rhs - (total_min - term_min(a, x, store));
        if a > 0 {
            store.set_max(x, clamp_i32(floor_div(slack, a)))?;
        } else {
            store.set_min(x, clamp_i32(ceil_div(slack, a)))?;
        }
    }
    Ok(())
}

fn enforce_ne(terms: &[(i64, VarId)], rhs: i64, store: &mut Store<'_>) -> PropResult {
    let mut open = None;
    let mut fixed_sum = 0i64;
    for &(a, x) in terms {
        match store.value(x) {
            Some(v) => fixed_sum += a * v as i64,
            None if open.is_none() => open = Some((a, x)),
            None => return Ok(()),
        }
    }
    match open {
        None if fixed_sum == rhs => Err(Failure),
        None => Ok(()),
        Some((a, x)) => {
            let rest = rhs - fixed_sum;
            if rest % a == 0 {
                store.remove(x, clamp_i32(rest / a))?;
            }
            Ok(())
        }
    }
}

fn enforce(terms: &[(i64, VarId)], rel: Rel, rhs: i64, store: &mut Store<'_>) -> PropResult {
    match rel {
        Rel::Le => enforce_le(terms, 1, rhs, store),
        Rel::Ge => enforce_le(terms, -1, -rhs, store),
        Rel::Eq => {
            enforce_le(terms, 1, rhs, store)?;
            enforce_le(terms, -1, -rhs, store)
        }
        Rel::Ne => enforce_ne(terms, rhs, store),
        Rel::Lt | Rel::Gt => {
            let (rel, rhs) = rel.normalize(rhs);
            enforce(terms, rel, rhs, store)
        }
    }
}

/// Whether the relation is already decided by the current bounds.
fn entailment(terms: &[(i64, VarId)], rel: Rel, rhs: i64, store: &Store<'_>) -> Option<bool> {
    let lo: i64 = terms.iter().map(|&(a, x)| term_min(a, x, store)).sum();
    let hi: i64 = terms.iter().map(|&(a, x)| term_max(a, x, store)).sum();
    match rel {
        Rel::Le if hi <= rhs => Some(true),
        Rel::Le if lo > rhs => Some(false),
        Rel::Ge if lo >= rhs => Some(true),
        Rel::Ge if hi < rhs => Some(false),
        Rel::Eq | Rel::Ne => {
            let eq = if lo == hi && lo == rhs {
                Some(true)
            } else if rhs < lo || rhs > hi || !single_open_supports(terms, rhs, store) {
                Some(false)
            } else {
                None
            };
            if rel == Rel::Eq { eq } else { eq.map(|e| !e) }
        }
        Rel::Lt | Rel::Gt => {
            let (rel, rhs) = rel.normalize(rhs);
            entailment(terms, rel, rhs, store)
        }
        _ => None,
    }
}

/// With exactly one unfixed term, check that its domain holds the value the
/// equality needs. Vacuously true otherwise.
fn single_open_supports(terms: &[(i64, VarId)], rhs: i64, store: &Store<'_>) -> bool {
    let mut open = None;
    let mut fixed_sum = 0i64;
    for &(a, x) in terms {
        match store.value(x) {
            Some(v) => fixed_sum += a * v as i64,
            None if open.is_none() => open = Some((a, x)),
            None => return true,
        }
    }
    match open {
        Some((a, x)) => {
            let rest = rhs - fixed_sum;
            rest % a == 0 && store.dom(x).contains(clamp_i32(rest / a))
        }
        None => fixed_sum == rhs,
    }
}

impl Propagator for Linear {
    fn vars(&self) -> Vec<VarId> {
        self.terms.iter().map(|&(_, x)| x).collect()
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        enforce(&self.terms, self.rel, self.rhs, store)
    }
}

/// b ⇔ (Σ aᵢxᵢ ⋈ rhs), with b a 0/1 variable.
#[derive(Debug)]
pub struct ReifiedLinear {
    terms: Vec<(i64, VarId)>,
    rel: Rel,
    rhs: i64,
    b: VarId,
}

impl ReifiedLinear {
    pub fn new(terms: &[(i32, VarId)], rel: Rel, rhs: i32, b: VarId) -> Self {
        let (rel, rhs) = rel.normalize(rhs as i64);
        Self {
            terms: merge_terms(terms),
            rel,
            rhs,
            b,
        }
    }
}

impl Propagator for ReifiedLinear {
    fn vars(&self) -> Vec<VarId> {
        let mut vars: Vec<VarId> = self.terms.iter().map(|&(_, x)| x).collect();
        vars.push(self.b);
        vars
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        match store.value(self.b) {
            Some(1) => enforce(&self.terms, self.rel, self.rhs, store),
            Some(_) => {
                let (rel, rhs) = self.rel.negate(self.rhs);
                enforce(&self.terms, rel, rhs, store)
            }
            None => match entailment(&self.terms, self.rel, self.rhs, store) {
                Some(holds) => store.fix(self.b, holds as i32),
                None => Ok(()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Arithmetic links
// ---------------------------------------------------------------------------

/// d = a − b.
#[derive(Debug)]
pub struct Difference {
    d: VarId,
    a: VarId,
    b: VarId,
}

impl Propagator for Difference {
    fn vars(&self) -> Vec<VarId> {
        vec![self.d, self.a, self.b]
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        let da = store.dom(self.a).clone();
        let db = store.dom(self.b).clone();
        store.retain(self.d, |v| da.iter().any(|x| db.contains(x - v)))?;
        let dd = store.dom(self.d).clone();
        store.retain(self.a, |x| dd.iter().any(|v| db.contains(x - v)))?;
        let da = store.dom(self.a).clone();
        store.retain(self.b, |y| da.iter().any(|x| dd.contains(x - y)))
    }
}

/// d = |a − b|.
#[derive(Debug)]
pub struct Distance {
    d: VarId,
    a: VarId,
    b: VarId,
}

impl Propagator for Distance {
    fn vars(&self) -> Vec<VarId> {
        vec![self.d, self.a, self.b]
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        let da = store.dom(self.a).clone();
        let db = store.dom(self.b).clone();
        store.retain(self.d, |v| {
            v >= 0 && da.iter().any(|x| db.contains(x - v) || db.contains(x + v))
        })?;
        let dd = store.dom(self.d).clone();
        store.retain(self.a, |x| db.iter().any(|y| dd.contains((x - y).abs())))?;
        let da = store.dom(self.a).clone();
        store.retain(self.b, |y| da.iter().any(|x| dd.contains((x - y).abs())))
    }
}

/// y = |x|.
#[derive(Debug)]
pub struct Abs {
    y: VarId,
    x: VarId,
}

impl Propagator for Abs {
    fn vars(&self) -> Vec<VarId> {
        vec![self.y, self.x]
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        let dx = store.dom(self.x).clone();
        store.retain(self.y, |v| v >= 0 && (dx.contains(v) || dx.contains(-v)))?;
        let dy = store.dom(self.y).clone();
        store.retain(self.x, |v| dy.contains(v.abs()))
    }
}

/// y = x mod m (Euclidean, so y ∈ [0, m)).
#[derive(Debug)]
pub struct Modulo {
    y: VarId,
    x: VarId,
    m: i32,
}

impl Propagator for Modulo {
    fn vars(&self) -> Vec<VarId> {
        vec![self.y, self.x]
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        let m = self.m;
        let dx = store.dom(self.x).clone();
        store.retain(self.y, |r| dx.iter().any(|v| v.rem_euclid(m) == r))?;
        let dy = store.dom(self.y).clone();
        store.retain(self.x, |v| dy.contains(v.rem_euclid(m)))
    }
}

// ---------------------------------------------------------------------------
// Counting
// ---------------------------------------------------------------------------

/// n = #{ i | xᵢ ∈ S }.
#[derive(Debug)]
pub struct Count {
    xs: Vec<VarId>,
    set: Domain,
    n: VarId,
}

impl Propagator for Count {
    fn vars(&self) -> Vec<VarId> {
        let mut vars = self.xs.clone();
        vars.push(self.n);
        vars
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        let mut sure = 0;
        let mut undecided = Vec::new();
        for &x in &self.xs {
            let dom = store.dom(x);
            if dom.is_subset_of(&self.set) {
                sure += 1;
            } else if dom.intersects(&self.set) {
                undecided.push(x);
            }
        }
        let possible = sure + undecided.len() as i32;
        store.set_min(self.n, sure)?;
        store.set_max(self.n, possible)?;
        if undecided.is_empty() {
            return Ok(());
        }
        if store.max(self.n) == sure {
            for x in undecided {
                store.retain(x, |v| !self.set.contains(v))?;
            }
        } else if store.min(self.n) == possible {
            for x in undecided {
                store.retain(x, |v| self.set.contains(v))?;
            }
        }
        Ok(())
    }
}

/// n = number of distinct values among xs.
#[derive(Debug)]
pub struct NValues {
    xs: Vec<VarId>,
    n: VarId,
}

impl Propagator for NValues {
    fn vars(&self) -> Vec<VarId> {
        let mut vars = self.xs.clone();
        vars.push(self.n);
        vars
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        let mut fixed: Vec<i32> = Vec::new();
        let mut open = Vec::new();
        let mut union: Vec<i32> = Vec::new();
        for &x in &self.xs {
            match store.value(x) {
                Some(v) => fixed.push(v),
                None => open.push(x),
            }
            union.extend(store.dom(x).iter());
        }
        fixed.sort_unstable();
        fixed.dedup();
        union.sort_unstable();
        union.dedup();

        let k = fixed.len() as i32;
        let lower = if self.xs.is_empty() { 0 } else { k.max(1) };
        let upper = (k + open.len() as i32).min(union.len() as i32);
        store.set_min(self.n, lower)?;
        store.set_max(self.n, upper)?;
        if open.is_empty() {
            return Ok(());
        }
        if k > 0 && store.max(self.n) == k {
            for x in open {
                store.retain(x, |v| fixed.binary_search(&v).is_ok())?;
            }
        } else if store.min(self.n) == k + open.len() as i32 {
            for x in open {
                store.retain(x, |v| fixed.binary_search(&v).is_err())?;
            }
        }
        Ok(())
    }
}

/// b ⇔ x ∈ S.
#[derive(Debug)]
pub struct ReifiedMember {
    x: VarId,
    set: Domain,
    b: VarId,
}

impl Propagator for ReifiedMember {
    fn vars(&self) -> Vec<VarId> {
        vec![self.x, self.b]
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        match store.value(self.b) {
            Some(1) => store.retain(self.x, |v| self.set.contains(v)),
            Some(_) => store.retain(self.x, |v| !self.set.contains(v)),
            None => {
                let dom = store.dom(self.x);
                if dom.is_subset_of(&self.set) {
                    store.fix(self.b, 1)
                } else if !dom.intersects(&self.set) {
                    store.fix(self.b, 0)
                } else {
                    Ok(())
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Objective bound
// ---------------------------------------------------------------------------

/// xs <lex bound, where the bound is whatever the space currently holds.
/// Inactive until branch and bound installs one.
#[derive(Debug)]
pub struct LexLess {
    xs: Vec<VarId>,
}

impl LexLess {
    pub fn new(xs: Vec<VarId>) -> Self {
        Self { xs }
    }
}

impl Propagator for LexLess {
    fn vars(&self) -> Vec<VarId> {
        self.xs.clone()
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        let Some(bound) = store.lex_bound().map(<[i32]>::to_vec) else {
            return Ok(());
        };
        for (i, &x) in self.xs.iter().enumerate() {
            let Some(&b) = bound.get(i) else {
                break;
            };
            store.set_max(x, b)?;
            if store.value(x) == Some(b) {
                continue;
            }
            // x can still equal b; if the cheapest completion of the suffix
            // cannot undercut the bound, it must not.
            if !self.suffix_can_undercut(i + 1, &bound, store) {
                store.set_max(x, b - 1)?;
            }
            return Ok(());
        }
        // Every position equals the bound.
        Err(Failure)
    }
}

impl LexLess {
    fn suffix_can_undercut(&self, from: usize, bound: &[i32], store: &Store<'_>) -> bool {
        for (j, &x) in self.xs.iter().enumerate().skip(from) {
            let Some(&b) = bound.get(j) else {
                return false;
            };
            let lo = store.min(x);
            if lo != b {
                return lo < b;
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Checked predicates
// ---------------------------------------------------------------------------

pub type Predicate = Arc<dyn Fn(&[i32]) -> bool + Send + Sync>;

/// An arbitrary relation over a handful of variables, given as a predicate
/// on their values. Filters by forward checking.
pub struct Check {
    label: &'static str,
    vars: Vec<VarId>,
    pred: Predicate,
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("label", &self.label)
            .field("vars", &self.vars)
            .finish()
    }
}

impl Propagator for Check {
    fn vars(&self) -> Vec<VarId> {
        self.vars.clone()
    }

    fn propagate(&self, store: &mut Store<'_>) -> PropResult {
        let mut values = Vec::with_capacity(self.vars.len());
        let mut open = None;
        for (i, &x) in self.vars.iter().enumerate() {
            match store.value(x) {
                Some(v) => values.push(v),
                None if open.is_none() => {
                    open = Some(i);
                    values.push(store.min(x));
                }
                None => return Ok(()),
            }
        }
        match open {
            None if (self.pred)(&values) => Ok(()),
            None => Err(Failure),
            Some(i) => store.retain(self.vars[i], |v| {
                values[i] = v;
                (self.pred)(&values)
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Posting
// ---------------------------------------------------------------------------

impl Space {
    /// Σ aᵢxᵢ ⋈ rhs.
    pub fn linear(&mut self, terms: &[(i32, VarId)], rel: Rel, rhs: i32) {
        self.post(Linear::new(terms, rel, rhs));
    }

    /// A fresh variable equal to Σ xs.
    pub fn sum(&mut self, xs: &[VarId]) -> VarId {
        let lo = xs.iter().map(|&x| self.dom(x).min()).sum();
        let hi = xs.iter().map(|&x| self.dom(x).max()).sum();
        let total = self.aux_var(lo, hi);
        let mut terms: Vec<(i32, VarId)> = xs.iter().map(|&x| (1, x)).collect();
        terms.push((-1, total));
        self.linear(&terms, Rel::Eq, 0);
        total
    }

    /// d = minuend − subtrahend.
    pub fn difference(&mut self, d: VarId, minuend: VarId, subtrahend: VarId) {
        self.post(Difference {
            d,
            a: minuend,
            b: subtrahend,
        });
    }

    /// d = |a − b|.
    pub fn distance(&mut self, d: VarId, a: VarId, b: VarId) {
        self.post(Distance { d, a, b });
    }

    /// y = |x|.
    pub fn abs(&mut self, y: VarId, x: VarId) {
        self.post(Abs { y, x });
    }

    /// y = x mod m, with m > 0.
    pub fn modulo(&mut self, y: VarId, x: VarId, m: i32) {
        debug_assert!(m > 0);
        self.post(Modulo { y, x, m });
    }

    /// A fresh counter n = #{ x ∈ xs | x ∈ values }.
    pub fn count_var(&mut self, xs: &[VarId], values: impl IntoIterator<Item = i32>) -> VarId {
        let n = self.aux_var(0, xs.len() as i32);
        self.post(Count {
            xs: xs.to_vec(),
            set: Domain::from_values(values),
            n,
        });
        n
    }

    /// #{ x ∈ xs | x ∈ values } ⋈ rhs. Supports `Eq`, `Le`, `Lt`, `Ge`,
    /// `Gt` and `Ne`.
    pub fn count(
        &mut self,
        xs: &[VarId],
        values: impl IntoIterator<Item = i32>,
        rel: Rel,
        rhs: i32,
    ) -> VarId {
        let n = self.count_var(xs, values);
        self.linear(&[(1, n)], rel, rhs);
        n
    }

    /// A fresh counter of the distinct values among xs.
    pub fn nvalues(&mut self, xs: &[VarId]) -> VarId {
        let n = self.aux_var(0, xs.len() as i32);
        self.post(NValues { xs: xs.to_vec(), n });
        n
    }

    /// A fresh indicator b ⇔ (Σ aᵢxᵢ ⋈ rhs).
    pub fn reify_linear(&mut self, terms: &[(i32, VarId)], rel: Rel, rhs: i32) -> VarId {
        let b = self.bool_var();
        self.post(ReifiedLinear::new(terms, rel, rhs, b));
        b
    }

    /// A fresh indicator b ⇔ x ∈ values.
    pub fn reify_member(&mut self, x: VarId, values: impl IntoIterator<Item = i32>) -> VarId {
        let b = self.bool_var();
        self.post(ReifiedMember {
            x,
            set: Domain::from_values(values),
            b,
        });
        b
    }

    /// a ⇒ b over indicators.
    pub fn implies(&mut self, a: VarId, b: VarId) {
        self.linear(&[(1, a), (-1, b)], Rel::Le, 0);
    }

    /// a ⇔ b over indicators.
    pub fn equivalent(&mut self, a: VarId, b: VarId) {
        self.linear(&[(1, a), (-1, b)], Rel::Eq, 0);
    }

    /// a ⇔ ¬b over indicators.
    pub fn exclusive(&mut self, a: VarId, b: VarId) {
        self.linear(&[(1, a), (1, b)], Rel::Eq, 1);
    }

    /// A fresh indicator that holds iff every indicator in `bs` holds.
    pub fn conjunction(&mut self, bs: &[VarId]) -> VarId {
        let terms: Vec<(i32, VarId)> = bs.iter().map(|&b| (1, b)).collect();
        self.reify_linear(&terms, Rel::Ge, bs.len() as i32)
    }

    /// Constrain `vars` so that `pred` holds on their values.
    pub fn check(
        &mut self,
        label: &'static str,
        vars: &[VarId],
        pred: impl Fn(&[i32]) -> bool + Send + Sync + 'static,
    ) {
        self.post(Check {
            label,
            vars: vars.to_vec(),
            pred: Arc::new(pred),
        });
    }
}
