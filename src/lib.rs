//! solvent - a rule solver over entity-component stores
//!
//! For a given rule expression, the solver returns all combinations of
//! variable values that satisfy the constraints of the rule. An
//! expression is a list of terms; each term applies a predicate to a
//! subject and an optional object, and any of the three positions can be
//! a variable. A term without variables is a fact, and evaluating it
//! answers plain true or false.
//!
//! # Architecture
//!
//! Solving happens in two phases over a shared data model:
//!
//! 1. **Compilation** ([`Rule::new`]) scans the terms for variables,
//!    elects a root, orders variables by dependency depth, and emits a
//!    flat program of typed ops.
//! 2. **Execution** ([`RuleIter`]) interprets the program with
//!    coroutine-style redo semantics: each op owns a register frame and a
//!    scratch context, results surface at the trailing Yield op, and
//!    re-entering the iterator backtracks into the most recent op with
//!    more matches to give.
//!
//! Storage is external: the solver reads entities and tables through the
//! [`Store`] trait, and treats predicates with the transitive meta tag as
//! closed under `P(a, b), P(b, c) => P(a, c)`. Predicates without the
//! final meta tag implicitly match through `IsA` specialization. The
//! crate ships [`World`], a small archetype store, as the reference
//! implementation of that trait.
//!
//! # Example
//!
//! ```rust
//! use solvent::{Rule, Term, TermArg, World};
//!
//! let mut world = World::new();
//! let jedi = world.entity("Jedi");
//! world.set_final(jedi);
//! let yoda = world.entity("Yoda");
//! world.add(yoda, jedi);
//!
//! // Jedi(.) enumerates every entity tagged Jedi.
//! let rule = Rule::new(&world, vec![Term::tag(jedi, TermArg::This)]).unwrap();
//! let mut it = rule.iter();
//! while it.next_match() {
//!     for &entity in it.entities() {
//!         println!("{}", entity);
//!     }
//! }
//! ```

pub mod error;
pub mod id;
pub mod solver;
pub mod store;
pub mod term;
pub mod world;

pub use error::{RuleError, RuleResult};
pub use id::Id;
pub use solver::{Rule, RuleIter, VarKind, MAX_VARIABLE_COUNT};
pub use store::{EntityLocation, Store, TableId, TableRecord, TableSet};
pub use term::{Term, TermArg};
pub use world::World;
