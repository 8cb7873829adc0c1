// Depth-first search and branch-and-bound over copy-on-branch spaces.
//
// `solve()` returns a lazy `Solutions` iterator. Each call to `next()`
// resumes the depth-first walk from an explicit stack of spaces, propagates
// the popped node, and either discards it (failure), yields it (solution),
// or splits it into `x = v` / `x ≠ v` children.
//
// In `BestByLexCost` mode every yielded solution becomes the incumbent and
// each node popped afterwards first receives the incumbent's cost vector as
// a strict lexicographic upper bound, so the stream is strictly improving
// and its last element is optimal (unless the walk was cut short by the
// timeout; `Solutions::timed_out()` tells the two apart).
//
// The timeout is checked once per node, so the overshoot is bounded by the
// cost of propagating a single node.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::branch::{BranchRng, Brancher, ValueSelection, VarSelection};
use crate::space::{Assignment, Space};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveMode {
    /// Stop after the first solution.
    FirstSolution,
    /// Enumerate every solution, depth first.
    AllSolutions,
    /// Branch and bound on the space's lexicographic objective.
    BestByLexCost,
}

#[derive(Clone, Debug, Default)]
pub struct SearchOptions {
    pub timeout: Option<Duration>,
    pub var_selection: VarSelection,
    pub value_selection: ValueSelection,
    pub seed: u64,
    /// Only accept solutions strictly below this cost vector
    /// (`BestByLexCost` only).
    pub initial_bound: Option<Vec<i32>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("branch and bound needs an objective; call Space::minimize_lex first")]
    NoObjective,
    #[error("initial bound has {got} components but the objective has {expected}")]
    BoundArity { expected: usize, got: usize },
}

/// Counters for one `solve()` call, cumulative up to the moment they are
/// read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    pub nodes: u64,
    pub failures: u64,
    pub propagations: u64,
    pub solutions: u64,
    pub max_depth: usize,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Solution {
    pub assignment: Assignment,
    /// The objective values, when the space declared an objective.
    pub cost: Option<Vec<i32>>,
    pub stats: SearchStats,
}

pub struct Solutions {
    stack: Vec<(Space, usize)>,
    mode: SolveMode,
    brancher: Brancher,
    rng: BranchRng,
    incumbent: Option<Vec<i32>>,
    timeout: Option<Duration>,
    started: Instant,
    stats: SearchStats,
    timed_out: bool,
    done: bool,
}

/// Start a search over `space`.
pub fn solve(space: Space, mode: SolveMode, options: SearchOptions) -> Result<Solutions, SearchError> {
    if mode == SolveMode::BestByLexCost {
        if space.objective().is_empty() {
            return Err(SearchError::NoObjective);
        }
        match &options.initial_bound {
            Some(bound) if bound.len() != space.objective().len() => {
                return Err(SearchError::BoundArity {
                    expected: space.objective().len(),
                    got: bound.len(),
                });
            }
            _ => {}
        }
    }
    debug!(
        vars = space.num_vars(),
        propagators = space.num_propagators(),
        ?mode,
        "starting search"
    );
    Ok(Solutions {
        stack: vec![(space, 0)],
        mode,
        brancher: Brancher {
            var_selection: options.var_selection,
            value_selection: options.value_selection,
        },
        rng: BranchRng::new(options.seed),
        incumbent: match mode {
            SolveMode::BestByLexCost => options.initial_bound,
            _ => None,
        },
        timeout: options.timeout,
        started: Instant::now(),
        stats: SearchStats::default(),
        timed_out: false,
        done: false,
    })
}

impl Solutions {
    pub fn stats(&self) -> SearchStats {
        let mut stats = self.stats;
        stats.elapsed_ms = self.started.elapsed().as_millis() as u64;
        stats
    }

    /// True if the walk stopped because the time budget ran out.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// True if the search tree was explored completely. In branch-and-bound
    /// mode this means the last solution yielded is optimal.
    pub fn exhausted(&self) -> bool {
        self.done && !self.timed_out && self.stack.is_empty()
    }

    /// The best cost vector seen so far (branch-and-bound mode).
    pub fn incumbent(&self) -> Option<&[i32]> {
        self.incumbent.as_deref()
    }

    fn out_of_time(&self) -> bool {
        self.timeout
            .is_some_and(|limit| self.started.elapsed() >= limit)
    }
}

impl Iterator for Solutions {
    type Item = Solution;

    fn next(&mut self) -> Option<Solution> {
        if self.done {
            return None;
        }
        loop {
            if self.out_of_time() {
                warn!(
                    nodes = self.stats.nodes,
                    solutions = self.stats.solutions,
                    "search timed out"
                );
                self.timed_out = true;
                self.done = true;
                return None;
            }
            let Some((mut space, depth)) = self.stack.pop() else {
                let stats = self.stats();
                info!(
                    nodes = stats.nodes,
                    failures = stats.failures,
                    solutions = stats.solutions,
                    elapsed_ms = stats.elapsed_ms,
                    "search space exhausted"
                );
                self.done = true;
                return None;
            };
            self.stats.nodes += 1;
            self.stats.max_depth = self.stats.max_depth.max(depth);

            if let Some(bound) = &self.incumbent {
                space.set_lex_bound(bound.clone());
            }
            self.stats.propagations += space.propagate();
            if space.is_failed() {
                self.stats.failures += 1;
                continue;
            }

            match self.brancher.choose(&space, &mut self.rng) {
                Some((var, value)) => {
                    let mut right = space.clone();
                    right.exclude(var, value);
                    space.assign(var, value);
                    self.stack.push((right, depth + 1));
                    self.stack.push((space, depth + 1));
                }
                None => {
                    let Some(assignment) = space.assignment() else {
                        self.stats.failures += 1;
                        continue;
                    };
                    let cost = space.objective_values();
                    self.stats.solutions += 1;
                    debug!(nodes = self.stats.nodes, ?cost, "solution found");
                    match self.mode {
                        SolveMode::FirstSolution => self.done = true,
                        SolveMode::BestByLexCost => self.incumbent = cost.clone(),
                        SolveMode::AllSolutions => {}
                    }
                    return Some(Solution {
                        assignment,
                        cost,
                        stats: self.stats(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagators::Rel;
    use crate::space::VarId;

    /// x + y = 4 over [0, 4]², objective (|x - y|, x).
    fn small_model() -> (Space, VarId, VarId) {
        let mut space = Space::new();
        let x = space.int_var(0, 4);
        let y = space.int_var(0, 4);
        space.linear(&[(1, x), (1, y)], Rel::Eq, 4);
        let gap = space.aux_var(0, 4);
        space.distance(gap, x, y);
        space.minimize_lex(vec![gap, x]);
        (space, x, y)
    }

    #[test]
    fn test_all_solutions_enumerates_everything() {
        let (space, x, y) = small_model();
        let solutions: Vec<_> = solve(space, SolveMode::AllSolutions, SearchOptions::default())
            .unwrap()
            .map(|s| (s.assignment.value(x), s.assignment.value(y)))
            .collect();
        assert_eq!(solutions, vec![(0, 4), (1, 3), (2, 2), (3, 1), (4, 0)]);
    }

    #[test]
    fn test_first_solution_stops() {
        let (space, x, _) = small_model();
        let options = SearchOptions {
            value_selection: ValueSelection::Max,
            ..SearchOptions::default()
        };
        let mut it = solve(space, SolveMode::FirstSolution, options).unwrap();
        let first = it.next().unwrap();
        assert_eq!(first.assignment.value(x), 4);
        assert!(it.next().is_none());
    }

    #[test]
    fn test_branch_and_bound_is_strictly_improving() {
        let (space, _, _) = small_model();
        let costs: Vec<Vec<i32>> = solve(space, SolveMode::BestByLexCost, SearchOptions::default())
            .unwrap()
            .filter_map(|s| s.cost)
            .collect();
        for pair in costs.windows(2) {
            assert!(pair[1] < pair[0]);
        }
        assert_eq!(costs.last(), Some(&vec![0, 2]));
    }

    #[test]
    fn test_initial_bound_at_optimum_yields_nothing() {
        let (space, _, _) = small_model();
        let options = SearchOptions {
            initial_bound: Some(vec![0, 2]),
            ..SearchOptions::default()
        };
        let mut it = solve(space, SolveMode::BestByLexCost, options).unwrap();
        assert!(it.next().is_none());
        assert!(it.exhausted());
    }

    #[test]
    fn test_bound_arity_is_checked() {
        let (space, _, _) = small_model();
        let options = SearchOptions {
            initial_bound: Some(vec![1]),
            ..SearchOptions::default()
        };
        assert_eq!(
            solve(space, SolveMode::BestByLexCost, options).err(),
            Some(SearchError::BoundArity {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_branch_and_bound_requires_objective() {
        let mut space = Space::new();
        space.int_var(0, 1);
        assert_eq!(
            solve(space, SolveMode::BestByLexCost, SearchOptions::default()).err(),
            Some(SearchError::NoObjective)
        );
    }

    #[test]
    fn test_infeasible_model_yields_nothing() {
        let mut space = Space::new();
        let x = space.int_var(0, 3);
        let y = space.int_var(0, 3);
        space.linear(&[(1, x), (1, y)], Rel::Ge, 7);
        let mut it = solve(space, SolveMode::FirstSolution, SearchOptions::default()).unwrap();
        assert!(it.next().is_none());
        assert!(!it.timed_out());
        assert_eq!(it.stats().solutions, 0);
    }

    #[test]
    fn test_zero_timeout_stops_immediately() {
        let (space, _, _) = small_model();
        let options = SearchOptions {
            timeout: Some(Duration::ZERO),
            ..SearchOptions::default()
        };
        let mut it = solve(space, SolveMode::AllSolutions, options).unwrap();
        assert!(it.next().is_none());
        assert!(it.timed_out());
        assert!(!it.exhausted());
    }

    #[test]
    fn test_random_values_are_reproducible() {
        let run = |seed| {
            let (space, x, _) = small_model();
            let options = SearchOptions {
                value_selection: ValueSelection::Random,
                seed,
                ..SearchOptions::default()
            };
            solve(space, SolveMode::AllSolutions, options)
                .unwrap()
                .map(|s| s.assignment.value(x))
                .collect::<Vec<_>>()
        };
        let a = run(99);
        assert_eq!(a, run(99));
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_stats_count_nodes() {
        let (space, _, _) = small_model();
        let mut it = solve(space, SolveMode::AllSolutions, SearchOptions::default()).unwrap();
        while it.next().is_some() {}
        let stats = it.stats();
        assert_eq!(stats.solutions, 5);
        assert!(stats.nodes >= 5);
        assert!(stats.propagations > 0);
    }
}
