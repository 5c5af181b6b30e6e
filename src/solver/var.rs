//! Variable analysis
//!
//! Scans the term list for variables, elects a root, computes each
//! variable's dependency depth from the root, and orders variables so the
//! compiler emits ops in an order where every op's inputs are already
//! bound. The subject of a rule can exist twice under one name, once as
//! a table variable and once as an entity variable, to support iterating
//! the rows of a matched table.

use tracing::trace;

use crate::error::{RuleError, RuleResult};
use crate::term::{Term, TermArg};

use super::Rule;

/// Hard cap on variables in a single rule.
pub const MAX_VARIABLE_COUNT: usize = 256;

/// Depth sentinel for variables not (yet) reachable from the root.
pub(crate) const DEPTH_MAX: i32 = u8::MAX as i32;

/// Variable kinds. `Table` sorts before `Entity`: table variables are
/// resolved first and entity variables derived from them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum VarKind {
    Table,
    Entity,
    Unknown,
}

#[derive(Clone, Debug)]
pub(crate) struct RuleVar {
    pub kind: VarKind,
    pub name: String,
    pub id: usize,
    /// Subject occurrence count, used for root election and ordering.
    pub occurs: u32,
    /// Distance from the root in the dependency graph.
    pub depth: i32,
    /// Visiting flag for cycle detection.
    pub marked: bool,
}

/// Find a variable with the given name and kind. `Unknown` matches any
/// kind and returns the first variable with the name, which is the table
/// variant when both exist.
pub(crate) fn find_variable(vars: &[RuleVar], kind: VarKind, name: &str) -> Option<usize> {
    vars.iter()
        .find(|v| v.name == name && (kind == VarKind::Unknown || kind == v.kind))
        .map(|v| v.id)
}

pub(crate) fn create_variable(
    rule: &mut Rule<'_>,
    kind: VarKind,
    name: Option<&str>,
) -> RuleResult<usize> {
    if rule.vars.len() >= MAX_VARIABLE_COUNT {
        return Err(RuleError::VariableLimit { expr: rule.expr.clone() });
    }
    let id = rule.vars.len();
    let name = match name {
        Some(name) => name.to_string(),
        // Anonymous register.
        None => format!("_{}", id),
    };
    rule.vars.push(RuleVar { kind, name, id, occurs: 0, depth: DEPTH_MAX, marked: false });
    Ok(id)
}

pub(crate) fn create_anonymous_variable(rule: &mut Rule<'_>, kind: VarKind) -> RuleResult<usize> {
    create_variable(rule, kind, None)
}

/// Find or create a variable. An existing variable of unknown kind takes
/// on the requested kind.
fn ensure_variable(rule: &mut Rule<'_>, kind: VarKind, name: &str) -> RuleResult<usize> {
    match find_variable(&rule.vars, kind, name) {
        Some(id) => {
            if rule.vars[id].kind == VarKind::Unknown {
                rule.vars[id].kind = kind;
            }
            Ok(id)
        }
        None => create_variable(rule, kind, Some(name)),
    }
}

/// Variable referenced by a term argument, if the argument is one.
fn arg_var(vars: &[RuleVar], arg: &TermArg) -> Option<usize> {
    arg.var_name().and_then(|name| find_variable(vars, VarKind::Unknown, name))
}

pub(crate) fn term_pred_var(vars: &[RuleVar], term: &Term) -> Option<usize> {
    arg_var(vars, &term.pred)
}

pub(crate) fn term_subj_var(vars: &[RuleVar], term: &Term) -> Option<usize> {
    term.subject().and_then(|arg| arg_var(vars, arg))
}

pub(crate) fn term_obj_var(vars: &[RuleVar], term: &Term) -> Option<usize> {
    term.object().and_then(|arg| arg_var(vars, arg))
}

/// Whether a variable occurs as a subject. Subject variables are created
/// first, so their ids sit below the subject count.
fn is_subject(rule: &Rule<'_>, var: Option<usize>) -> bool {
    matches!(var, Some(v) if v < rule.subject_var_count)
}

/// Depth contribution of one neighboring variable. A visit back into the
/// variable under evaluation indicates a cycle and contributes zero.
fn depth_from_var(rule: &mut Rule<'_>, var: usize, root: usize) -> i32 {
    {
        let v = &rule.vars[var];
        if var == root || v.depth != DEPTH_MAX {
            return v.depth + 1;
        }
        if v.marked {
            return 0;
        }
    }
    let depth = variable_depth(rule, var, root);
    if depth == DEPTH_MAX {
        depth
    } else {
        depth + 1
    }
}

/// Minimum depth derivable for `cur` from one term, considering only the
/// term's subject-variable neighbors.
fn depth_from_term(
    rule: &mut Rule<'_>,
    cur: usize,
    pred: Option<usize>,
    obj: Option<usize>,
    root: usize,
) -> i32 {
    // No other variables in the term: no dependencies.
    if pred.is_none() && obj.is_none() {
        return 0;
    }

    let mut result = DEPTH_MAX;
    for var in [pred, obj].into_iter().flatten() {
        if var == cur {
            continue;
        }
        let depth = depth_from_var(rule, var, root);
        if depth == DEPTH_MAX {
            return DEPTH_MAX;
        }
        if depth < result {
            result = depth;
        }
    }
    result
}

/// Follow predicate and object edges out of every term containing `var`,
/// assigning depths to variables only reachable through non-subject
/// positions.
fn crawl_variable(rule: &mut Rule<'_>, var: usize, root: usize) {
    for t in 0..rule.terms.len() {
        let term = rule.terms[t].clone();
        let pred = term_pred_var(&rule.vars, &term);
        let subj = term_subj_var(&rule.vars, &term);
        let obj = term_obj_var(&rule.vars, &term);

        if pred != Some(var) && subj != Some(var) && obj != Some(var) {
            continue;
        }

        for other in [pred, subj, obj].into_iter().flatten() {
            if other != var && !rule.vars[other].marked {
                variable_depth(rule, other, root);
            }
        }
    }
}

/// Depth of the dependency tree from `var` to the root.
fn variable_depth(rule: &mut Rule<'_>, var: usize, root: usize) -> i32 {
    rule.vars[var].marked = true;

    // Find all terms where `var` is the subject; the depth is derived
    // from the predicate and object variables of those terms.
    let mut result = DEPTH_MAX;
    for t in 0..rule.terms.len() {
        let term = rule.terms[t].clone();
        let subj = term_subj_var(&rule.vars, &term);
        if subj != Some(var) {
            continue;
        }

        let pred = term_pred_var(&rule.vars, &term).filter(|&p| is_subject(rule, Some(p)));
        let obj = term_obj_var(&rule.vars, &term).filter(|&o| is_subject(rule, Some(o)));

        let depth = depth_from_term(rule, var, pred, obj, root);
        if depth < result {
            result = depth;
        }
    }

    if result == DEPTH_MAX {
        result = 0;
    }
    rule.vars[var].depth = result;

    // Depths flow from subject to (pred, obj). Subjects related only
    // through a shared predicate or object are not reached that way, so
    // crawl the other positions of this subject's terms as well.
    for t in 0..rule.terms.len() {
        let term = rule.terms[t].clone();
        let subj = term_subj_var(&rule.vars, &term);
        if subj != Some(var) {
            continue;
        }
        let pred = term_pred_var(&rule.vars, &term);
        let obj = term_obj_var(&rule.vars, &term);

        crawl_variable(rule, var, root);
        if let Some(p) = pred {
            if p != var {
                crawl_variable(rule, p, root);
            }
        }
        if let Some(o) = obj {
            if o != var {
                crawl_variable(rule, o, root);
            }
        }
    }

    rule.vars[var].depth
}

/// Register the entity variants of all variables before any ops are
/// emitted: every variable predicate and object, and every named variable
/// subject, must be resolvable as an entity so the program returns all
/// permutations.
fn ensure_all_variables(rule: &mut Rule<'_>) -> RuleResult<()> {
    for t in 0..rule.terms.len() {
        let term = rule.terms[t].clone();

        if let Some(name) = term.pred.var_name() {
            ensure_variable(rule, VarKind::Entity, name)?;
        }
        if let Some(TermArg::Var(name)) = term.subject() {
            let name = name.clone();
            ensure_variable(rule, VarKind::Entity, &name)?;
        }
        if let Some(name) = term.object().and_then(TermArg::var_name) {
            let name = name.to_string();
            ensure_variable(rule, VarKind::Entity, &name)?;
        }
    }
    Ok(())
}

/// Scan for variables and put them in dependency order.
pub(crate) fn scan_variables(rule: &mut Rule<'_>) -> RuleResult<()> {
    // The `.` subject always takes precedence in root election; otherwise
    // the subject variable with the most occurrences wins.
    let mut this_var = None;
    let mut max_occur = 0;
    let mut max_occur_var = None;

    for t in 0..rule.terms.len() {
        let term = rule.terms[t].clone();

        if term.args.len() > 2 || term.args.is_empty() {
            return Err(RuleError::TermArity { expr: rule.expr.clone(), term: t });
        }

        // Only subjects can be elected root; predicates and objects are
        // not evaluated here.
        let Some(name) = term.subject().and_then(TermArg::var_name) else {
            continue;
        };
        let name = name.to_string();
        let subj = match find_variable(&rule.vars, VarKind::Table, &name) {
            Some(subj) => subj,
            None => create_variable(rule, VarKind::Table, Some(&name))?,
        };
        if matches!(term.subject(), Some(TermArg::This)) {
            this_var = Some(subj);
        }
        rule.vars[subj].occurs += 1;
        if rule.vars[subj].occurs > max_occur {
            max_occur = rule.vars[subj].occurs;
            max_occur_var = Some(subj);
        }
    }

    rule.subject_var_count = rule.vars.len();

    ensure_all_variables(rule)?;

    let Some(root) = this_var.or(max_occur_var) else {
        // No subject variables: the rule is a closed formula over a fixed
        // set of entities, and no ordering is needed.
        return Ok(());
    };

    let depth = variable_depth(rule, root, root);
    rule.vars[root].depth = depth;

    for v in 0..rule.subject_var_count {
        if rule.vars[v].depth == DEPTH_MAX {
            return Err(RuleError::UnconstrainedVariable {
                expr: rule.expr.clone(),
                name: rule.vars[v].name.clone(),
            });
        }
    }

    // Order by kind, then depth, then occurrence. The sort is stable, so
    // ties keep creation order.
    rule.vars.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then(a.depth.cmp(&b.depth))
            .then(b.occurs.cmp(&a.occurs))
    });
    for (id, var) in rule.vars.iter_mut().enumerate() {
        var.id = id;
    }

    trace!(
        vars = ?rule.vars.iter().map(|v| (&v.name, v.kind, v.depth)).collect::<Vec<_>>(),
        "ordered rule variables"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;
    use crate::solver::Rule;
    use crate::world::World;

    fn scan(world: &World, terms: Vec<Term>) -> RuleResult<Rule<'_>> {
        let mut rule = Rule::empty(world, terms);
        scan_variables(&mut rule)?;
        Ok(rule)
    }

    #[test]
    fn test_this_subject_becomes_table_variable() {
        let mut w = World::new();
        let jedi = w.entity("Jedi");
        let rule = scan(&w, vec![Term::tag(jedi, TermArg::This)]).unwrap();
        assert_eq!(rule.subject_var_count, 1);
        assert_eq!(rule.vars[0].kind, VarKind::Table);
        assert_eq!(rule.vars[0].name, ".");
    }

    #[test]
    fn test_pred_and_object_get_entity_variables() {
        let mut w = World::new();
        let t = w.entity("Tatooine");
        let rule = scan(&w, vec![Term::pair("X", TermArg::This, t)]).unwrap();
        let x = find_variable(&rule.vars, VarKind::Entity, "X");
        assert!(x.is_some());
        assert!(find_variable(&rule.vars, VarKind::Table, "X").is_none());
    }

    #[test]
    fn test_named_subject_gets_both_variants() {
        let mut w = World::new();
        let jedi = w.entity("Jedi");
        let rule = scan(&w, vec![Term::tag(jedi, "X")]).unwrap();
        assert!(find_variable(&rule.vars, VarKind::Table, "X").is_some());
        assert!(find_variable(&rule.vars, VarKind::Entity, "X").is_some());
    }

    #[test]
    fn test_sort_puts_root_first() {
        let mut w = World::new();
        let likes = w.entity("Likes");
        // Likes(., X), Likes(X, Y): `.` is root, X depth 1, Y depth 2.
        let rule = scan(
            &w,
            vec![
                Term::pair(likes, TermArg::This, "X"),
                Term::pair(likes, "X", "Y"),
            ],
        )
        .unwrap();
        assert_eq!(rule.vars[0].name, ".");
        assert_eq!(rule.vars[0].depth, 0);
        let x = find_variable(&rule.vars, VarKind::Table, "X").unwrap();
        assert_eq!(rule.vars[x].depth, 1);
        assert!(x < rule.subject_var_count);
    }

    #[test]
    fn test_cyclic_terms_terminate() {
        let mut w = World::new();
        let likes = w.entity("Likes");
        let rule = scan(
            &w,
            vec![
                Term::pair(likes, TermArg::This, "X"),
                Term::pair(likes, "X", TermArg::This),
            ],
        )
        .unwrap();
        for v in 0..rule.subject_var_count {
            assert_ne!(rule.vars[v].depth, DEPTH_MAX);
        }
    }

    #[test]
    fn test_unconstrained_variable_is_rejected() {
        let mut w = World::new();
        let likes = w.entity("Likes");
        let hates = w.entity("Hates");
        let err = scan(
            &w,
            vec![
                Term::pair(likes, TermArg::This, "X"),
                Term::tag(hates, "Y"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::UnconstrainedVariable { name, .. } if name == "Y"));
    }

    #[test]
    fn test_arity_error() {
        let mut w = World::new();
        let p = w.entity("P");
        let term = Term {
            pred: TermArg::Entity(p),
            args: vec![TermArg::This, TermArg::Var("X".into()), TermArg::Var("Y".into())],
        };
        let err = scan(&w, vec![term]).unwrap_err();
        assert!(matches!(err, RuleError::TermArity { term: 0, .. }));
    }

    #[test]
    fn test_variable_limit() {
        let mut w = World::new();
        let p = w.entity("P");
        let terms: Vec<Term> = (0..300)
            .map(|i| Term::tag(p, TermArg::Var(format!("V{}", i))))
            .collect();
        let err = scan(&w, terms).unwrap_err();
        assert!(matches!(err, RuleError::VariableLimit { .. }));
    }
}
