// Finite-domain constraint solver for small combinatorial models.
//
// The crate provides exactly what a rule-based model needs from a solver:
// integer variables with bitset domains (`domain.rs`), a propagation store
// with copy-on-branch cloning (`space.rs`), a library of propagators and the
// `Space` methods that post them (`propagators.rs`), branching heuristics
// (`branch.rs`), and depth-first / branch-and-bound search exposed as a lazy
// iterator of solutions (`search.rs`).
//
// Typical use:
//
//     let mut space = Space::new();
//     let x = space.int_var(0, 9);
//     let y = space.int_var(0, 9);
//     space.linear(&[(1, x), (1, y)], Rel::Eq, 9);
//     space.minimize_lex(vec![x]);
//     let best = solve(space, SolveMode::BestByLexCost, SearchOptions::default())?.last();
//
// Everything is single-threaded and deterministic: the same model, options
// and seed always produce the same sequence of solutions.

pub mod branch;
pub mod domain;
pub mod propagators;
pub mod search;
pub mod space;

pub use branch::{ValueSelection, VarSelection};
pub use domain::Domain;
pub use propagators::Rel;
pub use search::{SearchError, SearchOptions, SearchStats, Solution, Solutions, SolveMode, solve};
pub use space::{Assignment, Space, Status, VarId};
