//! Program emission
//!
//! Turns the analyzed term list into a flat op array. Terms with literal
//! subjects come first since they narrow the search the most, then each
//! subject variable's terms in dependency order. Emission tracks which
//! variables have been written so it can choose between Select (writes
//! its subject) and With (reads it), derive entity variables from table
//! variables with Each, and expand non-final predicates over IsA.

use tracing::{debug, trace};

use crate::error::RuleResult;
use crate::id::Id;
use crate::term::{Term, TermArg};

use super::program::{Op, OpKind, Pair, PairArg, NO_COLUMN};
use super::var::{
    create_anonymous_variable, create_variable, find_variable, term_obj_var, term_pred_var,
    term_subj_var, RuleVar, VarKind, MAX_VARIABLE_COUNT,
};
use super::Rule;

fn create_operation(rule: &mut Rule<'_>) -> usize {
    rule.ops.push(Op::default());
    rule.ops.len() - 1
}

/// Translate a term into a pair. Variables are always looked up as
/// entities; pairs never refer to tables.
fn term_to_pair(rule: &Rule<'_>, term: &Term) -> Pair {
    let mut pair = Pair::default();

    match term.pred.var_name() {
        Some(name) => {
            let var = match find_variable(&rule.vars, VarKind::Entity, name) {
                Some(var) => var,
                None => unreachable!("pair predicate variable is registered during scan"),
            };
            pair.pred = PairArg::Var(var);
            pair.final_pred = true;
        }
        None => {
            let pred = match term.pred.entity() {
                Some(id) => id,
                None => unreachable!("term predicate is a variable or an entity"),
            };
            pair.pred = PairArg::Id(pred);
            // Transitive evaluation needs an object to close over.
            if rule.store.is_transitive(pred) && term.args.len() == 2 {
                pair.transitive = true;
            }
            if rule.store.is_final(pred) {
                pair.final_pred = true;
            }
        }
    }

    let Some(object) = term.object() else {
        return pair;
    };
    match object.var_name() {
        Some(name) => {
            let var = match find_variable(&rule.vars, VarKind::Entity, name) {
                Some(var) => var,
                None => unreachable!("pair object variable is registered during scan"),
            };
            pair.obj = PairArg::Var(var);
        }
        None => {
            if let Some(id) = object.entity() {
                pair.obj = PairArg::Id(id);
            }
        }
    }

    pair
}

/// Entity variant of a variable, if one exists.
fn to_entity(vars: &[RuleVar], var: usize) -> Option<usize> {
    if vars[var].kind == VarKind::Table {
        find_variable(vars, VarKind::Entity, &vars[var].name)
    } else {
        Some(var)
    }
}

/// Return the most specific written variant of a variable, preferring the
/// entity form. If only the table form has been written, emit an Each
/// that derives the entity form from it.
fn get_most_specific_var(rule: &mut Rule<'_>, var: usize, written: &mut [bool]) -> usize {
    let Some(evar) = to_entity(&rule.vars, var) else {
        return var;
    };
    let tvar = if rule.vars[var].kind == VarKind::Table {
        Some(var)
    } else {
        find_variable(&rule.vars, VarKind::Table, &rule.vars[var].name)
    };

    // Table variables usually resolve before their entity form is needed,
    // but cyclic dependencies can reverse that. Only derive the entity
    // when the table has actually been written.
    if let Some(tvar) = tvar {
        if written[tvar] {
            if !written[evar] {
                let op = create_operation(rule);
                let count = rule.ops.len() as i32;
                let op = &mut rule.ops[op];
                op.kind = OpKind::Each;
                op.on_pass = count;
                op.on_fail = count - 2;
                op.has_in = true;
                op.has_out = true;
                op.r_in = Some(tvar);
                op.r_out = Some(evar);
                written[evar] = true;
            }
            return evar;
        }
    }
    if written[evar] {
        return evar;
    }
    var
}

/// Like [`get_most_specific_var`], with the postcondition that the result
/// is a written entity variable.
fn ensure_entity_written(rule: &mut Rule<'_>, var: usize, written: &mut [bool]) -> usize {
    let evar = get_most_specific_var(rule, var, written);
    debug_assert_eq!(rule.vars[evar].kind, VarKind::Entity);
    debug_assert!(written[evar]);
    evar
}

/// Create an op with default control flow (pass forward, fail backward)
/// and, when the op originates from a term, its pair. Entity variables in
/// the pair are narrowed to their most specific written variant, which
/// may insert Each ops first.
fn insert_operation(rule: &mut Rule<'_>, column: i32, written: &mut [bool]) -> usize {
    let mut pair = Pair::default();
    if column != NO_COLUMN {
        let term = rule.terms[column as usize].clone();
        pair = term_to_pair(rule, &term);
        if let PairArg::Var(pred) = pair.pred {
            pair.pred = PairArg::Var(get_most_specific_var(rule, pred, written));
        }
        if let PairArg::Var(obj) = pair.obj {
            pair.obj = PairArg::Var(get_most_specific_var(rule, obj, written));
        }
    }

    let index = create_operation(rule);
    let count = rule.ops.len() as i32;
    let op = &mut rule.ops[index];
    op.on_pass = count;
    op.on_fail = count - 2;
    op.pair = pair;
    op.column = column;
    index
}

/// The first op of every program. On redo it fails, which ends the run.
fn insert_input(rule: &mut Rule<'_>) {
    let index = create_operation(rule);
    let op = &mut rule.ops[index];
    op.kind = OpKind::Input;
    op.on_pass = 1;
    op.on_fail = -1;
}

/// The last op of every program. Its input register is the entity form of
/// `.` when one exists, else the table form, else nothing (a closed rule
/// that only answers true or false).
fn insert_yield(rule: &mut Rule<'_>) {
    let index = create_operation(rule);
    let count = rule.ops.len() as i32;
    let this = find_variable(&rule.vars, VarKind::Entity, ".")
        .or_else(|| find_variable(&rule.vars, VarKind::Table, "."));
    let op = &mut rule.ops[index];
    op.kind = OpKind::Yield;
    op.has_in = true;
    op.on_fail = count - 2;
    op.r_in = this;
}

fn subject_literal(term: &Term) -> Id {
    term.subject().and_then(TermArg::entity).unwrap_or(Id::NULL)
}

fn object_literal(term: &Term) -> Id {
    term.object().and_then(TermArg::entity).unwrap_or(Id::NULL)
}

fn set_input_to_subj(op: &mut Op, term: &Term, var: Option<usize>) {
    op.has_in = true;
    match var {
        None => {
            op.r_in = None;
            op.subject = subject_literal(term);
        }
        Some(var) => op.r_in = Some(var),
    }
}

fn set_output_to_subj(op: &mut Op, term: &Term, var: Option<usize>) {
    op.has_out = true;
    match var {
        None => {
            op.r_out = None;
            op.subject = subject_literal(term);
        }
        Some(var) => op.r_out = Some(var),
    }
}

/// Pick Select or With for a term. If neither the subject's table nor its
/// entity form is written yet, Select writes the subject; otherwise With
/// filters whichever form is available, preferring the entity.
fn insert_select_or_with(
    rule: &mut Rule<'_>,
    index: usize,
    term: &Term,
    subj: Option<usize>,
    written: &mut [bool],
) {
    let evar = subj.and_then(|s| to_entity(&rule.vars, s));
    let tvar = subj.filter(|&s| rule.vars[s].kind == VarKind::Table);

    let op = &mut rule.ops[index];
    match (evar, tvar) {
        (Some(evar), _) if written[evar] => {
            op.kind = OpKind::With;
            set_input_to_subj(op, term, subj);
        }
        (_, Some(tvar)) if written[tvar] => {
            op.kind = OpKind::With;
            set_input_to_subj(op, term, subj);
        }
        (None, None) => {
            // Literal subject.
            op.kind = OpKind::With;
            set_input_to_subj(op, term, subj);
        }
        _ => {
            let subj = match subj {
                Some(subj) => subj,
                None => unreachable!("select always writes a variable subject"),
            };
            op.kind = OpKind::Select;
            set_output_to_subj(op, term, Some(subj));
            written[subj] = true;
        }
    }

    // A matching op reifies the pair's variables.
    if let PairArg::Var(pred) = rule.ops[index].pair.pred {
        written[pred] = true;
    }
    if let PairArg::Var(obj) = rule.ops[index].pair.obj {
        written[obj] = true;
    }
}

/// Emit the inclusive-set quartet. SetJmp first passes into Store, which
/// yields the root of the subtree; on redo it flips into the SubSet or
/// SuperSet, which runs the actual traversal. The trailing Jump re-enters
/// the quartet at whichever op the SetJmp slot names.
fn insert_inclusive_set(
    rule: &mut Rule<'_>,
    kind: OpKind,
    out: usize,
    param: Pair,
    root: Option<usize>,
    root_entity: Id,
    column: i32,
    written: &mut [bool],
) {
    debug_assert!(kind != OpKind::SuperSet || rule.vars[out].kind == VarKind::Entity);

    let setjmp_lbl = rule.ops.len() as i32;
    let store_lbl = setjmp_lbl + 1;
    let set_lbl = setjmp_lbl + 2;
    let next_op = setjmp_lbl + 4;
    let prev_op = setjmp_lbl - 1;

    insert_operation(rule, NO_COLUMN, written);
    insert_operation(rule, NO_COLUMN, written);
    insert_operation(rule, NO_COLUMN, written);
    insert_operation(rule, NO_COLUMN, written);

    let obj = match root {
        None => PairArg::Id(root_entity),
        Some(root) => PairArg::Var(root),
    };

    let setjmp = &mut rule.ops[setjmp_lbl as usize];
    setjmp.kind = OpKind::SetJmp;
    setjmp.on_pass = store_lbl;
    setjmp.on_fail = set_lbl;

    let store = &mut rule.ops[store_lbl as usize];
    store.kind = OpKind::Store;
    store.pair.pred = param.pred;
    store.pair.obj = obj;
    store.on_pass = next_op;
    store.on_fail = setjmp_lbl;
    store.has_in = true;
    store.has_out = true;
    store.r_out = Some(out);
    store.column = column;
    match root {
        None => {
            store.r_in = None;
            store.subject = root_entity;
        }
        Some(root) => store.r_in = Some(root),
    }

    let set = &mut rule.ops[set_lbl as usize];
    set.kind = kind;
    set.pair.pred = param.pred;
    set.pair.obj = obj;
    set.on_pass = next_op;
    set.on_fail = prev_op;
    set.has_out = true;
    set.r_out = Some(out);
    set.column = column;

    // The Jump's own labels never steer control flow; on_pass names the
    // SetJmp whose slot holds the real destination.
    let jump = &mut rule.ops[setjmp_lbl as usize + 3];
    jump.kind = OpKind::Jump;
    jump.on_pass = setjmp_lbl;
    jump.on_fail = -1;

    written[out] = true;
}

/// Emit an inclusive set into a fresh anonymous variable and return its
/// written entity form. SubSet produces tables, so it gets an entity twin
/// derived with Each; SuperSet produces entities directly.
fn store_inclusive_set(
    rule: &mut Rule<'_>,
    kind: OpKind,
    param: Pair,
    root: Option<usize>,
    root_entity: Id,
    written: &mut [bool],
) -> RuleResult<usize> {
    let var_kind = if kind == OpKind::SuperSet { VarKind::Entity } else { VarKind::Table };

    let mut av = create_anonymous_variable(rule, var_kind)?;
    if var_kind == VarKind::Table {
        let name = rule.vars[av].name.clone();
        create_variable(rule, VarKind::Entity, Some(&name))?;
    }

    let root = root.map(|root| get_most_specific_var(rule, root, written));
    insert_inclusive_set(rule, kind, av, param, root, root_entity, NO_COLUMN, written);

    av = ensure_entity_written(rule, av, written);
    Ok(av)
}

fn is_known(var: Option<usize>, written: &[bool]) -> bool {
    match var {
        None => true,
        Some(var) => written[var],
    }
}

/// A non-final predicate implicitly matches through IsA: enumerate the
/// inclusive subsets of the predicate into an anonymous variable, then
/// Select/With with that variable in predicate position.
fn insert_nonfinal_select_or_with(
    rule: &mut Rule<'_>,
    term: &Term,
    param: Pair,
    subj: Option<usize>,
    column: i32,
    written: &mut [bool],
) -> RuleResult<()> {
    debug_assert!(!param.final_pred);
    let PairArg::Id(pred_id) = param.pred else {
        unreachable!("non-final predicates are literals");
    };

    let pred_param = Pair {
        pred: PairArg::Id(Id::ISA),
        obj: PairArg::Id(pred_id),
        ..Pair::default()
    };
    let pred_subsets =
        store_inclusive_set(rule, OpKind::SubSet, pred_param, None, pred_id, written)?;

    // Make sure the object resolves through its most specific variant.
    if let PairArg::Var(obj) = param.obj {
        get_most_specific_var(rule, obj, written);
    }

    let index = insert_operation(rule, NO_COLUMN, written);
    let op = &mut rule.ops[index];
    op.pair.pred = PairArg::Var(pred_subsets);
    op.pair.obj = param.obj;
    // Associate the op with its term so the matched id is reported.
    op.column = column;

    insert_select_or_with(rule, index, term, subj, written);
    Ok(())
}

fn insert_term_1(
    rule: &mut Rule<'_>,
    term: &Term,
    column: i32,
    written: &mut [bool],
) -> RuleResult<()> {
    let pred = term_pred_var(&rule.vars, term);
    let subj = term_subj_var(&rule.vars, term);
    let param = term_to_pair(rule, term);

    let subj = subj.map(|s| get_most_specific_var(rule, s, written));

    if pred.is_some() || param.final_pred {
        let index = insert_operation(rule, column, written);
        insert_select_or_with(rule, index, term, subj, written);
        Ok(())
    } else {
        insert_nonfinal_select_or_with(rule, term, param, subj, column, written)
    }
}

fn insert_term_2(
    rule: &mut Rule<'_>,
    term: &Term,
    column: i32,
    written: &mut [bool],
) -> RuleResult<()> {
    let pred = term_pred_var(&rule.vars, term);
    let subj0 = term_subj_var(&rule.vars, term);
    let obj = term_obj_var(&rule.vars, term);
    let param = term_to_pair(rule, term);

    let subj = subj0.map(|s| get_most_specific_var(rule, s, written));

    if pred.is_some() || (param.final_pred && !param.transitive) {
        let index = insert_operation(rule, column, written);
        insert_select_or_with(rule, index, term, subj, written);
    } else if !param.final_pred {
        insert_nonfinal_select_or_with(rule, term, param, subj, column, written)?;
    } else if param.transitive {
        if is_known(subj, written) {
            if is_known(obj, written) {
                // Subject and object both bound: enumerate the subsets of
                // the object and match the subject against each.
                let obj_subsets = store_inclusive_set(
                    rule,
                    OpKind::SubSet,
                    param,
                    obj,
                    object_literal(term),
                    written,
                )?;

                // Resolve the subject as an entity if it became one.
                let subj = subj.map(|s| {
                    if rule.vars[s].kind == VarKind::Table {
                        get_most_specific_var(rule, s, written)
                    } else {
                        s
                    }
                });

                let index = insert_operation(rule, column, written);
                let op = &mut rule.ops[index];
                op.kind = OpKind::With;
                op.pair.obj = PairArg::Var(obj_subsets);
                set_input_to_subj(op, term, subj);
            } else {
                // Subject bound, object free: climb from the subject.
                let obj = obj.and_then(|o| to_entity(&rule.vars, o));
                let out = match obj {
                    Some(out) => out,
                    None => unreachable!("free object is a registered variable"),
                };
                insert_inclusive_set(
                    rule,
                    OpKind::SuperSet,
                    out,
                    param,
                    subj,
                    subject_literal(term),
                    column,
                    written,
                );
            }
        } else {
            let subj = match subj {
                Some(subj) => subj,
                None => unreachable!("unbound subject is a variable"),
            };
            if is_known(obj, written) {
                // Object bound: descend from it into the subject. The
                // object variable may only exist as a table here.
                let obj = obj.map(|o| get_most_specific_var(rule, o, written));
                insert_inclusive_set(
                    rule,
                    OpKind::SubSet,
                    subj,
                    param,
                    obj,
                    object_literal(term),
                    column,
                    written,
                );
            } else {
                // Neither side bound: select every (pred, *) edge into an
                // anonymous object, then climb from it inclusively.
                let av = create_anonymous_variable(rule, VarKind::Entity)?;

                let index = insert_operation(rule, NO_COLUMN, written);
                let op = &mut rule.ops[index];
                op.kind = OpKind::Select;
                op.pair.pred = param.pred;
                op.pair.obj = PairArg::Var(av);
                set_output_to_subj(op, term, Some(subj));
                written[subj] = true;
                written[av] = true;

                let set_param = rule.ops[index].pair;
                let out = obj.and_then(|o| to_entity(&rule.vars, o));
                let out = match out {
                    Some(out) => out,
                    None => unreachable!("free object is a registered variable"),
                };
                insert_inclusive_set(
                    rule,
                    OpKind::SuperSet,
                    out,
                    set_param,
                    Some(av),
                    Id::NULL,
                    column,
                    written,
                );
            }
        }
    }
    Ok(())
}

fn insert_term(
    rule: &mut Rule<'_>,
    term: &Term,
    column: i32,
    written: &mut [bool],
) -> RuleResult<()> {
    match term.args.len() {
        1 => insert_term_1(rule, term, column, written),
        2 => insert_term_2(rule, term, column, written),
        _ => unreachable!("term arity is validated during scan"),
    }
}

/// Create the program that evaluates the rule.
pub(crate) fn compile_program(rule: &mut Rule<'_>) -> RuleResult<()> {
    // Tracks which variables have been written while emitting; this
    // decides which op each term compiles to.
    let mut written = [false; MAX_VARIABLE_COUNT];

    insert_input(rule);

    // Terms with literal subjects first: they iterate a single entity's
    // type and narrow the result set early.
    for c in 0..rule.terms.len() {
        let term = rule.terms[c].clone();
        if term_subj_var(&rule.vars, &term).is_some() {
            continue;
        }
        insert_term(rule, &term, c as i32, &mut written)?;
    }

    // Then each subject variable's terms, in dependency order.
    for v in 0..rule.subject_var_count {
        debug_assert_eq!(rule.vars[v].kind, VarKind::Table);
        for c in 0..rule.terms.len() {
            let term = rule.terms[c].clone();
            if term_subj_var(&rule.vars, &term) != Some(v) {
                continue;
            }
            insert_term(rule, &term, c as i32, &mut written)?;
        }
    }

    // Every subject variable now has a written table register, or an op
    // wrote its entity form first.
    for v in 0..rule.subject_var_count {
        if !written[v] {
            debug_assert!(matches!(
                find_variable(&rule.vars, VarKind::Entity, &rule.vars[v].name),
                Some(e) if written[e]
            ));
        }
    }

    // Entity variables constrained only through a shared predicate or
    // object are still unwritten; derive each from its table form so the
    // iterator returns all permutations.
    for v in rule.subject_var_count..rule.vars.len() {
        if written[v] {
            continue;
        }
        debug_assert_eq!(rule.vars[v].kind, VarKind::Entity);
        let tvar = match find_variable(&rule.vars, VarKind::Table, &rule.vars[v].name) {
            Some(tvar) => tvar,
            None => unreachable!("unwritten entity variable has a table form"),
        };
        let index = insert_operation(rule, NO_COLUMN, &mut written);
        let op = &mut rule.ops[index];
        op.kind = OpKind::Each;
        op.r_in = Some(tvar);
        op.r_out = Some(v);
        op.has_in = true;
        op.has_out = true;
        written[v] = true;
    }

    insert_yield(rule);

    debug!(ops = rule.ops.len(), vars = rule.vars.len(), expr = %rule.expr, "compiled rule");
    for (i, op) in rule.ops.iter().enumerate() {
        trace!(i, kind = ?op.kind, on_pass = op.on_pass, on_fail = op.on_fail, "op");
    }

    Ok(())
}
