//! The rule solver
//!
//! For a rule expression, a list of terms over predicates, subjects and
//! objects where any position may be a variable, the solver enumerates
//! every combination of variable values that satisfies all terms. A rule
//! compiles once into a flat program of ops; iterating it interprets the
//! program lazily, one result per suspension.

mod compile;
mod iter;
mod program;
mod var;

use itertools::Itertools;
use std::fmt::Write;

use crate::error::RuleResult;
use crate::id::Id;
use crate::store::Store;
use crate::term::{Term, TermArg};

pub use iter::RuleIter;
pub use program::OpKind;
pub use var::{VarKind, MAX_VARIABLE_COUNT};

use program::{Op, PairArg};
use var::{find_variable, RuleVar};

/// A compiled rule: a reusable program over a store.
///
/// The program is immutable after compilation; any number of iterators
/// may run it concurrently against the same store. The rule keeps a
/// reference to its store so it can be iterated without re-supplying it.
pub struct Rule<'w> {
    pub(crate) store: &'w dyn Store,
    pub(crate) terms: Vec<Term>,
    pub(crate) expr: String,
    pub(crate) vars: Vec<RuleVar>,
    pub(crate) subject_var_count: usize,
    pub(crate) ops: Vec<Op>,
}

impl<'w> std::fmt::Debug for Rule<'w> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("expr", &self.expr)
            .field("terms", &self.terms)
            .field("vars", &self.vars)
            .field("subject_var_count", &self.subject_var_count)
            .field("ops", &self.ops)
            .finish()
    }
}

impl<'w> Rule<'w> {
    /// Compile a term list into a rule program.
    pub fn new(store: &'w dyn Store, terms: Vec<Term>) -> RuleResult<Rule<'w>> {
        let expr = render_expr(store, &terms);
        let mut rule = Rule::empty_with_expr(store, terms, expr);
        var::scan_variables(&mut rule)?;
        compile::compile_program(&mut rule)?;
        Ok(rule)
    }

    #[cfg(test)]
    pub(crate) fn empty(store: &'w dyn Store, terms: Vec<Term>) -> Rule<'w> {
        let expr = render_expr(store, &terms);
        Rule::empty_with_expr(store, terms, expr)
    }

    fn empty_with_expr(store: &'w dyn Store, terms: Vec<Term>, expr: String) -> Rule<'w> {
        Rule { store, terms, expr, vars: Vec::new(), subject_var_count: 0, ops: Vec::new() }
    }

    /// Start a fresh enumeration of the rule's results.
    pub fn iter(&self) -> RuleIter<'_> {
        RuleIter::new(self)
    }

    /// Number of terms in the rule expression.
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// The rendered rule expression.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Find an entity variable by name.
    pub fn find_variable(&self, name: &str) -> Option<usize> {
        find_variable(&self.vars, VarKind::Entity, name)
    }

    pub fn variable_count(&self) -> usize {
        self.vars.len()
    }

    pub fn variable_name(&self, var: usize) -> &str {
        &self.vars[var].name
    }

    pub fn variable_is_entity(&self, var: usize) -> bool {
        self.vars[var].kind == VarKind::Entity
    }

    /// Render the program as one line per op, for analysis of how a rule
    /// is evaluated.
    pub fn explain(&self) -> String {
        let mut out = String::new();

        for (i, op) in self.ops.iter().enumerate().skip(1) {
            let (label, has_filter) = match op.kind {
                OpKind::Select => ("select   ", true),
                OpKind::With => ("with     ", true),
                OpKind::SubSet => ("subset   ", true),
                OpKind::SuperSet => ("superset ", true),
                OpKind::Store => ("store    ", false),
                OpKind::Each => ("each     ", false),
                OpKind::SetJmp => ("setjmp   ", false),
                OpKind::Jump => ("jump     ", false),
                OpKind::Yield => ("yield    ", false),
                OpKind::Input => continue,
            };

            let _ = write!(out, "{:2}: [P:{:2}, F:{:2}] {}", i, op.on_pass, op.on_fail, label);

            if op.has_in {
                if let Some(r) = op.r_in {
                    let _ = write!(out, "I:{} ", self.register_name(r));
                } else if !op.subject.is_null() {
                    let _ = write!(out, "I:{} ", self.entity_label(op.subject));
                }
            }
            if op.has_out {
                if let Some(r) = op.r_out {
                    let _ = write!(out, "O:{} ", self.register_name(r));
                } else if !op.subject.is_null() {
                    let _ = write!(out, "O:{} ", self.entity_label(op.subject));
                }
            }

            if has_filter {
                let pred = self.pair_arg_label(op.pair.pred);
                match op.pair.obj {
                    PairArg::None => {
                        let _ = write!(out, "F:({})", pred);
                    }
                    obj => {
                        let _ = write!(out, "F:({}, {})", pred, self.pair_arg_label(obj));
                    }
                }
            }
            out.push('\n');
        }

        out
    }

    fn register_name(&self, r: usize) -> String {
        let var = &self.vars[r];
        match var.kind {
            VarKind::Table => format!("t{}", var.name),
            _ => var.name.clone(),
        }
    }

    fn entity_label(&self, id: Id) -> String {
        match self.store.entity_name(id) {
            Some(name) => name.to_string(),
            None => format!("{}", id),
        }
    }

    fn pair_arg_label(&self, arg: PairArg) -> String {
        match arg {
            PairArg::None => String::new(),
            PairArg::Id(id) => self.entity_label(id),
            PairArg::Var(var) => self.vars[var].name.clone(),
        }
    }
}

fn arg_label(store: &dyn Store, arg: &TermArg) -> String {
    match arg {
        TermArg::Entity(id) => match store.entity_name(*id) {
            Some(name) => name.to_string(),
            None => format!("{}", id),
        },
        TermArg::Var(name) => name.clone(),
        TermArg::This => ".".to_string(),
    }
}

/// Reconstruct the surface form of a term list for diagnostics.
fn render_expr(store: &dyn Store, terms: &[Term]) -> String {
    terms
        .iter()
        .map(|term| {
            let pred = arg_label(store, &term.pred);
            let args = term.args.iter().map(|arg| arg_label(store, arg)).join(", ");
            format!("{}({})", pred, args)
        })
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;

    #[test]
    fn test_render_expr() {
        let mut w = World::new();
        let planet = w.entity("HomePlanet");
        let tatooine = w.entity("Tatooine");
        let rule =
            Rule::new(&w, vec![Term::pair(planet, TermArg::This, tatooine)]).unwrap();
        assert_eq!(rule.expr(), "HomePlanet(., Tatooine)");
    }

    #[test]
    fn test_program_shape_for_plain_pair() {
        let mut w = World::new();
        let planet = w.entity("HomePlanet");
        w.set_final(planet);
        let tatooine = w.entity("Tatooine");
        let rule =
            Rule::new(&w, vec![Term::pair(planet, TermArg::This, tatooine)]).unwrap();
        // Input, Select, Yield.
        let listing = rule.explain();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("select"));
        assert!(lines[0].contains("F:(HomePlanet, Tatooine)"));
        assert!(lines[0].contains("O:t."));
        assert!(lines[1].contains("yield"));
    }

    #[test]
    fn test_program_shape_for_transitive_pair() {
        let mut w = World::new();
        let character = w.entity("Character");
        let rule = Rule::new(
            &w,
            vec![Term::pair(crate::id::Id::ISA, TermArg::This, character)],
        )
        .unwrap();
        let listing = rule.explain();
        assert!(listing.contains("setjmp"));
        assert!(listing.contains("store"));
        assert!(listing.contains("subset"));
        assert!(listing.contains("jump"));
        assert!(listing.contains("yield"));
    }

    #[test]
    fn test_find_variable_returns_entity_variant() {
        let mut w = World::new();
        let tatooine = w.entity("Tatooine");
        let rule = Rule::new(&w, vec![Term::pair("X", TermArg::This, tatooine)]).unwrap();
        let x = rule.find_variable("X").unwrap();
        assert!(rule.variable_is_entity(x));
        assert_eq!(rule.variable_name(x), "X");
        assert!(rule.find_variable("Y").is_none());
    }
}
