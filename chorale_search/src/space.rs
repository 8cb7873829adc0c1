// The constraint store: variables, their domains, and the propagators
// posted over them.
//
// A `Space` owns one `Domain` per variable and a shared table of
// propagators. Cloning a space copies the domain vector and bumps the
// reference counts of the propagator and watcher tables, so the search tree
// can give every node its own copy (copy-on-branch) without duplicating the
// model. Once the first clone exists the tables are never mutated again.
//
// Propagation runs to a fixpoint with a FIFO queue. Every domain change
// reported through `Store` wakes the propagators watching that variable,
// including the one that made the change, since not every propagator is
// idempotent (bounds reasoning on linear sums can need several rounds).
//
// Model-building helpers (`linear`, `count`, `reify_member`, ...) live in
// `propagators.rs` as further `impl Space` blocks next to the propagators
// they post.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::domain::Domain;
use crate::propagators::{LexLess, Propagator};

/// Handle to a variable of a `Space`. Only meaningful for the space (or
/// clones of the space) that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// A propagator found that no assignment of its variables can satisfy it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Failure;

pub type PropResult = Result<(), Failure>;

/// Outcome of propagating a space to its fixpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Failed,
    /// Every variable is fixed.
    Solved,
    /// Consistent, but at least one variable still has a choice.
    Branch,
}

/// A total assignment read out of a solved space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    values: Vec<i32>,
}

impl Assignment {
    pub fn value(&self, var: VarId) -> i32 {
        self.values[var.index()]
    }

    pub fn values_of(&self, vars: &[VarId]) -> Vec<i32> {
        vars.iter().map(|&v| self.value(v)).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Space {
    domains: Vec<Domain>,
    props: Arc<Vec<Arc<dyn Propagator>>>,
    watchers: Arc<Vec<Vec<usize>>>,
    /// Variables the brancher decides on, in the order they were declared.
    decisions: Vec<VarId>,
    objective: Vec<VarId>,
    objective_prop: Option<usize>,
    /// Strict upper bound on the objective, installed by branch and bound.
    lex_bound: Option<Vec<i32>>,
    pending: Vec<usize>,
    full_pass: bool,
    failed: bool,
}

impl Space {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------

    /// A new decision variable over `[lo, hi]`.
    pub fn int_var(&mut self, lo: i32, hi: i32) -> VarId {
        let var = self.aux_var(lo, hi);
        self.decisions.push(var);
        var
    }

    /// A new decision variable over an explicit value set.
    pub fn int_var_in(&mut self, values: impl IntoIterator<Item = i32>) -> VarId {
        let var = self.new_var(Domain::from_values(values));
        self.decisions.push(var);
        var
    }

    /// A variable over `[lo, hi]` that is expected to become fixed through
    /// propagation alone. The brancher only touches it when a solution would
    /// otherwise be left incomplete.
    pub fn aux_var(&mut self, lo: i32, hi: i32) -> VarId {
        self.new_var(Domain::range(lo, hi))
    }

    /// A 0/1 indicator variable (auxiliary).
    pub fn bool_var(&mut self) -> VarId {
        self.aux_var(0, 1)
    }

    pub fn constant(&mut self, value: i32) -> VarId {
        self.new_var(Domain::singleton(value))
    }

    fn new_var(&mut self, domain: Domain) -> VarId {
        let id = VarId(self.domains.len() as u32);
        if domain.is_empty() {
            self.failed = true;
        }
        self.domains.push(domain);
        Arc::make_mut(&mut self.watchers).push(Vec::new());
        id
    }

    pub fn num_vars(&self) -> usize {
        self.domains.len()
    }

    pub fn num_propagators(&self) -> usize {
        self.props.len()
    }

    pub fn dom(&self, var: VarId) -> &Domain {
        &self.domains[var.index()]
    }

    pub fn value(&self, var: VarId) -> Option<i32> {
        self.dom(var).value()
    }

    pub fn decisions(&self) -> &[VarId] {
        &self.decisions
    }

    /// Number of propagators watching `var`.
    pub fn degree(&self, var: VarId) -> usize {
        self.watchers[var.index()].len()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    // -----------------------------------------------------------------
    // Direct domain edits (model building and branching)
    // -----------------------------------------------------------------

    /// Intersect the domain of `var` with `values`.
    pub fn restrict(&mut self, var: VarId, values: impl IntoIterator<Item = i32>) {
        let allowed = Domain::from_values(values);
        let changed = self.domains[var.index()].intersect(&allowed);
        self.after_edit(var, changed);
    }

    pub fn restrict_range(&mut self, var: VarId, lo: i32, hi: i32) {
        let dom = &mut self.domains[var.index()];
        let changed = dom.restrict_min(lo) | dom.restrict_max(hi);
        self.after_edit(var, changed);
    }

    /// Branching decision `var = value`.
    pub fn assign(&mut self, var: VarId, value: i32) {
        let changed = self.domains[var.index()].fix(value);
        self.after_edit(var, changed);
    }

    /// Branching decision `var != value`.
    pub fn exclude(&mut self, var: VarId, value: i32) {
        let changed = self.domains[var.index()].remove(value);
        self.after_edit(var, changed);
    }

    fn after_edit(&mut self, var: VarId, changed: bool) {
        if self.domains[var.index()].is_empty() {
            self.failed = true;
        }
        if changed {
            self.pending.extend(self.watchers[var.index()].iter().copied());
        }
    }

    // -----------------------------------------------------------------
    // Propagators and objective
    // -----------------------------------------------------------------

    /// Register a propagator. It runs the next time the space is
    /// propagated.
    pub fn post(&mut self, prop: impl Propagator + 'static) {
        let id = self.props.len();
        let vars = prop.vars();
        let watchers = Arc::make_mut(&mut self.watchers);
        for var in vars {
            let list = &mut watchers[var.index()];
            if list.last() != Some(&id) {
                list.push(id);
            }
        }
        Arc::make_mut(&mut self.props).push(Arc::new(prop));
        self.full_pass = true;
    }

    /// Declare the cost vector to minimize lexicographically. Branch and
    /// bound constrains later solutions to be strictly smaller than the
    /// incumbent on these variables.
    pub fn minimize_lex(&mut self, vars: Vec<VarId>) {
        self.objective_prop = Some(self.props.len());
        self.post(LexLess::new(vars.clone()));
        self.objective = vars;
    }

    pub fn objective(&self) -> &[VarId] {
        &self.objective
    }

    /// Current objective values, if every objective variable is fixed.
    pub fn objective_values(&self) -> Option<Vec<i32>> {
        self.objective.iter().map(|&v| self.value(v)).collect()
    }

    /// Require the objective to be lexicographically smaller than `bound`.
    pub fn set_lex_bound(&mut self, bound: Vec<i32>) {
        self.lex_bound = Some(bound);
        if let Some(id) = self.objective_prop {
            self.pending.push(id);
        }
    }

    pub fn lex_bound(&self) -> Option<&[i32]> {
        self.lex_bound.as_deref()
    }

    // -----------------------------------------------------------------
    // Propagation
    // -----------------------------------------------------------------

    /// Propagate to fixpoint and report where the space stands.
    pub fn status(&mut self) -> Status {
        self.propagate();
        if self.failed {
            Status::Failed
        } else if self.domains.iter().all(Domain::is_fixed) {
            Status::Solved
        } else {
            Status::Branch
        }
    }

    /// Run queued propagators until nothing changes. Returns the number of
    /// propagator executions.
    pub(crate) fn propagate(&mut self) -> u64 {
        if self.failed {
            return 0;
        }
        let props = Arc::clone(&self.props);
        let watchers = Arc::clone(&self.watchers);
        let mut queued = vec![false; props.len()];
        let mut queue = VecDeque::new();

        let initial: Vec<usize> = if self.full_pass {
            (0..props.len()).collect()
        } else {
            std::mem::take(&mut self.pending)
        };
        self.pending.clear();
        self.full_pass = false;
        for id in initial {
            if !queued[id] {
                queued[id] = true;
                queue.push_back(id);
            }
        }

        let mut runs = 0;
        while let Some(id) = queue.pop_front() {
            queued[id] = false;
            runs += 1;
            let mut store = Store {
                domains: &mut self.domains,
                lex_bound: self.lex_bound.as_deref(),
                modified: Vec::new(),
            };
            let result = props[id].propagate(&mut store);
            let modified = store.modified;
            if result.is_err() {
                self.failed = true;
                return runs;
            }
            for var in modified {
                for &w in &watchers[var.index()] {
                    if !queued[w] {
                        queued[w] = true;
                        queue.push_back(w);
                    }
                }
            }
        }
        runs
    }

    /// Read out a total assignment. `None` unless every variable is fixed.
    pub fn assignment(&self) -> Option<Assignment> {
        let values = self
            .domains
            .iter()
            .map(Domain::value)
            .collect::<Option<Vec<_>>>()?;
        Some(Assignment { values })
    }
}

/// The view of the domains a propagator works through. Every narrowing
/// goes through here so the space learns which variables changed.
pub struct Store<'a> {
    domains: &'a mut [Domain],
    lex_bound: Option<&'a [i32]>,
    modified: Vec<VarId>,
}

impl Store<'_> {
    pub fn dom(&self, var: VarId) -> &Domain {
        &self.domains[var.index()]
    }

    pub fn min(&self, var: VarId) -> i32 {
        self.dom(var).min()
    }

    pub fn max(&self, var: VarId) -> i32 {
        self.dom(var).max()
    }

    pub fn value(&self, var: VarId) -> Option<i32> {
        self.dom(var).value()
    }

    pub fn is_fixed(&self, var: VarId) -> bool {
        self.dom(var).is_fixed()
    }

    pub fn lex_bound(&self) -> Option<&[i32]> {
        self.lex_bound
    }

    pub fn set_min(&mut self, var: VarId, lo: i32) -> PropResult {
        let changed = self.domains[var.index()].restrict_min(lo);
        self.note(var, changed)
    }

    pub fn set_max(&mut self, var: VarId, hi: i32) -> PropResult {
        let changed = self.domains[var.index()].restrict_max(hi);
        self.note(var, changed)
    }

    pub fn fix(&mut self, var: VarId, value: i32) -> PropResult {
        let changed = self.domains[var.index()].fix(value);
        self.note(var, changed)
    }

    pub fn remove(&mut self, var: VarId, value: i32) -> PropResult {
        let changed = self.domains[var.index()].remove(value);
        self.note(var, changed)
    }

    pub fn retain(&mut self, var: VarId, keep: impl FnMut(i32) -> bool) -> PropResult {
        let changed = self.domains[var.index()].retain(keep);
        self.note(var, changed)
    }

    fn note(&mut self, var: VarId, changed: bool) -> PropResult {
        if self.domains[var.index()].is_empty() {
            return Err(Failure);
        }
        if changed {
            self.modified.push(var);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagators::Rel;

    #[test]
    fn test_fresh_space_branches() {
        let mut space = Space::new();
        space.int_var(0, 3);
        assert_eq!(space.status(), Status::Branch);
    }

    #[test]
    fn test_constants_alone_are_solved() {
        let mut space = Space::new();
        let c = space.constant(4);
        assert_eq!(space.status(), Status::Solved);
        assert_eq!(space.assignment().map(|a| a.value(c)), Some(4));
    }

    #[test]
    fn test_empty_variable_fails() {
        let mut space = Space::new();
        space.int_var_in(Vec::new());
        assert_eq!(space.status(), Status::Failed);
    }

    #[test]
    fn test_restrict_wakes_propagators() {
        let mut space = Space::new();
        let x = space.int_var(0, 10);
        let y = space.int_var(0, 10);
        space.linear(&[(1, x), (-1, y)], Rel::Eq, 0);
        assert_eq!(space.status(), Status::Branch);
        space.restrict(x, [3, 4]);
        space.status();
        assert_eq!(space.dom(y).iter().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_clone_isolates_domains() {
        let mut space = Space::new();
        let x = space.int_var(0, 5);
        let mut left = space.clone();
        left.assign(x, 2);
        assert_eq!(left.value(x), Some(2));
        assert_eq!(space.dom(x).size(), 6);
    }

    #[test]
    fn test_degree_counts_watchers() {
        let mut space = Space::new();
        let x = space.int_var(0, 5);
        let y = space.int_var(0, 5);
        space.linear(&[(1, x), (1, y)], Rel::Le, 5);
        space.linear(&[(1, x)], Rel::Ge, 1);
        assert_eq!(space.degree(x), 2);
        assert_eq!(space.degree(y), 1);
    }
}
