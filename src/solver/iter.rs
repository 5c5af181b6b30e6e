//! Program execution
//!
//! The iterator interprets a rule's program one op at a time. Every op
//! owns a frame (a full copy of the registers and per-term columns) plus
//! a scratch context, so re-entering an op with `redo` resumes exactly
//! where it stopped. Results surface when the trailing Yield op fails
//! back into its predecessor; the caller re-enters through
//! [`RuleIter::next_match`].

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::id::Id;
use crate::store::{Store, TableId, TableSet};

use super::program::{
    find_next_match, Filter, Op, OpKind, Pair, PairArg, RegValue, Register, TableRange, NO_COLUMN,
};
use super::var::{RuleVar, VarKind};
use super::Rule;

/// Cursor over one table set. Shared by Select and With; also embedded in
/// each SubSet frame.
#[derive(Clone, Copy, Debug)]
struct WithCtx<'a> {
    table_set: Option<&'a TableSet>,
    table_index: i32,
    /// Most recent match position, for wildcard rescans within a table.
    cur_column: i32,
}

impl Default for WithCtx<'_> {
    fn default() -> Self {
        WithCtx { table_set: None, table_index: -1, cur_column: -1 }
    }
}

/// One level of the SubSet depth-first traversal.
#[derive(Clone, Copy, Debug)]
struct SubSetFrame<'a> {
    with: WithCtx<'a>,
    table: TableId,
    row: usize,
    column: i32,
}

#[derive(Default, Debug)]
struct SubSetCtx<'a> {
    stack: SmallVec<[SubSetFrame<'a>; 16]>,
    sp: usize,
}

#[derive(Clone, Copy, Debug)]
struct SuperSetFrame {
    table: TableId,
    column: i32,
}

#[derive(Default, Debug)]
struct SuperSetCtx<'a> {
    table_set: Option<&'a TableSet>,
    stack: SmallVec<[SuperSetFrame; 16]>,
}

#[derive(Default, Debug)]
struct EachCtx {
    row: usize,
}

#[derive(Default, Debug)]
struct SetJmpCtx {
    label: i32,
}

/// Per-op scratch state. Indexed by op position, not kind: two ops of the
/// same kind never share state.
#[derive(Default, Debug)]
enum OpCtx<'a> {
    #[default]
    None,
    With(WithCtx<'a>),
    SubSet(SubSetCtx<'a>),
    SuperSet(SuperSetCtx<'a>),
    Each(EachCtx),
    SetJmp(SetJmpCtx),
}

#[derive(Default, Debug)]
struct OpState<'a> {
    ctx: OpCtx<'a>,
    /// The frame this op's inputs were copied from.
    last_op: usize,
}

fn frame(regs: &[Register], nvars: usize, op: usize) -> &[Register] {
    &regs[op * nvars..(op + 1) * nvars]
}

fn frame_mut(regs: &mut [Register], nvars: usize, op: usize) -> &mut [Register] {
    &mut regs[op * nvars..(op + 1) * nvars]
}

fn entity_reg_get(frame: &[Register], r: usize) -> Id {
    match frame[r].value {
        RegValue::Entity(e) => e,
        RegValue::Table(_) => unreachable!("entity register holds a table"),
    }
}

fn entity_reg_set(vars: &[RuleVar], frame: &mut [Register], r: usize, entity: Id) {
    debug_assert_eq!(frame[r].var, r);
    debug_assert_eq!(vars[r].kind, VarKind::Entity);
    frame[r].value = RegValue::Entity(entity);
}

fn table_range_get(frame: &[Register], r: usize) -> TableRange {
    match frame[r].value {
        RegValue::Table(range) => range,
        RegValue::Entity(_) => unreachable!("table register holds an entity"),
    }
}

fn table_reg_get(frame: &[Register], r: usize) -> Option<TableId> {
    table_range_get(frame, r).table
}

fn table_reg_set(vars: &[RuleVar], frame: &mut [Register], r: usize, table: TableId) {
    debug_assert_eq!(frame[r].var, r);
    debug_assert_eq!(vars[r].kind, VarKind::Table);
    frame[r].value = RegValue::Table(TableRange { table: Some(table), offset: 0, count: 0 });
}

/// Entity value of a register, or the op's constant subject.
fn reg_get_entity(
    store: &dyn Store,
    vars: &[RuleVar],
    op: &Op,
    frame: &[Register],
    r: Option<usize>,
) -> Id {
    let Some(r) = r else {
        debug_assert!(!op.subject.is_null());
        return op.subject;
    };
    match vars[r].kind {
        VarKind::Table => {
            let range = table_range_get(frame, r);
            debug_assert_eq!(range.count, 1);
            let Some(table) = range.table else {
                unreachable!("single-row table register is populated");
            };
            store.table_row_entities(table)[range.offset]
        }
        _ => entity_reg_get(frame, r),
    }
}

/// Table of a register value, or of the op's constant subject.
fn reg_get_table(
    store: &dyn Store,
    vars: &[RuleVar],
    op: &Op,
    frame: &[Register],
    r: Option<usize>,
) -> Option<TableId> {
    let Some(r) = r else {
        debug_assert!(!op.subject.is_null());
        return store.entity_location(op.subject).map(|loc| loc.table);
    };
    match vars[r].kind {
        VarKind::Table => table_reg_get(frame, r),
        _ => store.entity_location(entity_reg_get(frame, r)).map(|loc| loc.table),
    }
}

/// Store an entity into a register of either kind. Entity registers take
/// the id itself; table registers take the entity's (table, row) as a
/// single-row slice.
fn reg_set_entity(
    store: &dyn Store,
    vars: &[RuleVar],
    frame: &mut [Register],
    r: usize,
    entity: Id,
) {
    if vars[r].kind == VarKind::Table {
        match store.entity_location(entity) {
            Some(loc) => {
                frame[r].value = RegValue::Table(TableRange {
                    table: Some(loc.table),
                    offset: loc.row,
                    count: 1,
                });
            }
            None => warn!(?entity, "cannot store entity without a table"),
        }
    } else {
        entity_reg_set(vars, frame, r, entity);
    }
}

/// Translate a pair into a filter, substituting variables that were
/// reified up to the previous frame. Unreified variables still hold the
/// wildcard, which keeps the filter open in that field and names the
/// register to fill on a match.
fn pair_to_filter(prev: &[Register], pair: Pair) -> Filter {
    let mut filter = Filter::default();

    let has_obj = !pair.obj.is_none();
    let mut obj = Id::NULL;
    match pair.obj {
        PairArg::None => {}
        PairArg::Id(id) => obj = id,
        PairArg::Var(var) => {
            obj = entity_reg_get(prev, var);
            if obj == Id::WILDCARD {
                filter.wildcard = true;
                filter.obj_wildcard = true;
                filter.lo_var = Some(var);
            }
        }
    }

    let pred = match pair.pred {
        PairArg::None => Id::NULL,
        PairArg::Id(id) => id,
        PairArg::Var(var) => {
            let pred = entity_reg_get(prev, var);
            if pred == Id::WILDCARD {
                if filter.wildcard {
                    filter.same_var = pair.pred == pair.obj;
                }
                filter.wildcard = true;
                filter.pred_wildcard = true;
                if has_obj {
                    filter.hi_var = Some(var);
                } else {
                    filter.lo_var = Some(var);
                }
            }
            pred
        }
    };

    filter.mask = if has_obj { Id::pair(pred, obj) } else { pred };
    if filter.wildcard {
        filter.set_expr_mask(filter.mask);
    }
    filter
}

/// Write the concrete fields of a matched id into the registers the
/// filter names.
fn reify_variables(
    vars: &[RuleVar],
    frame: &mut [Register],
    filter: &Filter,
    ids: &[Id],
    column: usize,
) {
    let elem = ids[column];
    if let Some(lo) = filter.lo_var {
        entity_reg_set(vars, frame, lo, elem.lo());
    }
    if let Some(hi) = filter.hi_var {
        entity_reg_set(vars, frame, hi, elem.hi());
    }
}

/// Record the matched id for the op's signature column.
fn set_column(components: &mut [Id], op: &Op, ids: Option<&[Id]>, column: usize) {
    if op.column == NO_COLUMN {
        return;
    }
    components[op.column as usize] = match ids {
        Some(ids) => ids[column],
        None => Id::NULL,
    };
}

/// Advance to the next non-empty table in a set whose type matches the
/// filter. Empty tables and empty-match tables are skipped so downstream
/// ops never see them.
fn find_next_table(
    store: &dyn Store,
    set: &TableSet,
    filter: &Filter,
    ctx: &mut WithCtx<'_>,
) -> Option<(TableId, usize)> {
    if ctx.table_index >= set.len() as i32 {
        return None;
    }
    loop {
        ctx.table_index += 1;
        let record = set.record_at(ctx.table_index as usize)?;
        let table = record.table;
        if store.table_row_count(table) == 0 {
            continue;
        }
        if let Some(column) = find_next_match(store.table_ids(table), record.column, filter) {
            return Some((table, column));
        }
    }
}

fn set_frame<T>(stack: &mut SmallVec<[T; 16]>, index: usize, value: T) {
    if index < stack.len() {
        stack[index] = value;
    } else {
        debug_assert_eq!(index, stack.len());
        stack.push(value);
    }
}

/// Lazy evaluator for one rule. Owns all mutable state; the compiled
/// program and the store are shared read-only.
pub struct RuleIter<'a> {
    rule: &'a Rule<'a>,
    regs: Vec<Register>,
    columns: Vec<i32>,
    op_ctx: Vec<OpState<'a>>,
    components: Vec<Id>,
    op: i32,
    redo: bool,
    table: Option<TableId>,
    offset: usize,
    count: usize,
}

impl<'a> RuleIter<'a> {
    pub(crate) fn new(rule: &'a Rule<'a>) -> Self {
        let nops = rule.ops.len();
        let nvars = rule.vars.len();
        let nterms = rule.terms.len();

        let mut regs = Vec::with_capacity(nops * nvars);
        for _ in 0..nops {
            for (var, v) in rule.vars.iter().enumerate() {
                let value = match v.kind {
                    VarKind::Entity => RegValue::Entity(Id::WILDCARD),
                    _ => RegValue::Table(TableRange::default()),
                };
                regs.push(Register { var, value });
            }
        }

        let op_ctx = rule
            .ops
            .iter()
            .map(|op| OpState {
                last_op: 0,
                ctx: match op.kind {
                    OpKind::Select | OpKind::With => OpCtx::With(WithCtx::default()),
                    OpKind::SubSet => OpCtx::SubSet(SubSetCtx::default()),
                    OpKind::SuperSet => OpCtx::SuperSet(SuperSetCtx::default()),
                    OpKind::Each => OpCtx::Each(EachCtx::default()),
                    OpKind::SetJmp => OpCtx::SetJmp(SetJmpCtx::default()),
                    _ => OpCtx::None,
                },
            })
            .collect();

        RuleIter {
            rule,
            regs,
            columns: vec![NO_COLUMN; nops * nterms],
            op_ctx,
            components: vec![Id::NULL; nterms],
            op: 0,
            redo: false,
            table: None,
            offset: 0,
            count: 0,
        }
    }

    /// Advance to the next result. Returns `false` when the enumeration
    /// is exhausted, after which the iterator's buffers are released.
    pub fn next_match(&mut self) -> bool {
        let rule = self.rule;
        let mut redo = self.redo;
        let mut last_index = 0usize;

        while self.op != -1 {
            let op_index = self.op as usize;
            let op = rule.ops[op_index];

            // Fresh entry into a regular op: give it its own view of the
            // registers and columns so a later redo can resume cleanly.
            if !redo && op_index != 0 && !op.kind.is_control_flow() {
                self.push_frames(last_index, op_index);
                self.op_ctx[op_index].last_op = last_index;
            }

            let result = self.eval_op(&op, op_index, redo);
            trace!(op = op_index, kind = ?op.kind, redo, result, "eval");
            self.op = if result { op.on_pass } else { op.on_fail };
            redo = !result;

            match op.kind {
                OpKind::Yield => {
                    self.populate(&op, op_index);
                    self.redo = true;
                    return true;
                }
                // Jump lands wherever its SetJmp slot points.
                OpKind::Jump => {
                    let target = op.on_pass as usize;
                    self.op = match &self.op_ctx[target].ctx {
                        OpCtx::SetJmp(ctx) => ctx.label,
                        _ => unreachable!("jump targets a setjmp op"),
                    };
                }
                // SetJmp picks a branch; the branch itself starts fresh.
                OpKind::SetJmp => redo = false,
                _ => last_index = op_index,
            }
        }

        self.release();
        false
    }

    fn eval_op(&mut self, op: &Op, op_index: usize, redo: bool) -> bool {
        match op.kind {
            OpKind::Input => !redo,
            OpKind::Select => self.eval_select(op, op_index, redo),
            OpKind::With => self.eval_with(op, op_index, redo),
            OpKind::SubSet => self.eval_subset(op, op_index, redo),
            OpKind::SuperSet => self.eval_superset(op, op_index, redo),
            OpKind::Each => self.eval_each(op, op_index, redo),
            OpKind::Store => self.eval_store(op, op_index, redo),
            OpKind::SetJmp => self.eval_setjmp(op, op_index, redo),
            OpKind::Jump => !redo,
            // Yield only ever fails; failing re-enters the previous op
            // with redo, which is the one way results keep coming.
            OpKind::Yield => false,
        }
    }

    fn eval_select(&mut self, op: &Op, op_index: usize, redo: bool) -> bool {
        let rule = self.rule;
        let store = rule.store;
        let nvars = rule.vars.len();
        let nterms = rule.terms.len();
        let Some(r) = op.r_out else {
            unreachable!("select writes a register");
        };

        let last_op = self.op_ctx[op_index].last_op;
        let filter = pair_to_filter(frame(&self.regs, nvars, last_op), op.pair);

        let OpCtx::With(ctx) = &mut self.op_ctx[op_index].ctx else {
            unreachable!("select context");
        };

        // Variables may have changed since the last fresh entry, which
        // can change the table set to look up.
        if !redo {
            ctx.table_set = store.resolve_table_set(filter.mask);
        }
        let Some(set) = ctx.table_set else {
            return false;
        };

        let mut found: Option<(TableId, usize)> = None;
        if !redo {
            ctx.table_index = -1;
            let Some((table, column)) = find_next_table(store, set, &filter, ctx) else {
                return false;
            };
            found = Some((table, column));
            table_reg_set(&rule.vars, frame_mut(&mut self.regs, nvars, op_index), r, table);
        } else {
            // Wildcard filters may have further matches within the
            // current table.
            if filter.wildcard {
                if let Some(table) = table_reg_get(frame(&self.regs, nvars, op_index), r) {
                    let start = (ctx.cur_column + 1) as usize;
                    if let Some(column) = find_next_match(store.table_ids(table), start, &filter) {
                        found = Some((table, column));
                    }
                }
            }
            if found.is_none() {
                match find_next_table(store, set, &filter, ctx) {
                    Some(hit) => {
                        found = Some(hit);
                        table_reg_set(
                            &rule.vars,
                            frame_mut(&mut self.regs, nvars, op_index),
                            r,
                            hit.0,
                        );
                    }
                    None => return false,
                }
            }
        }

        let Some((table, column)) = found else {
            return false;
        };
        ctx.cur_column = column as i32;
        if op.column != NO_COLUMN {
            self.columns[op_index * nterms + op.column as usize] = column as i32;
        }

        if filter.wildcard {
            reify_variables(
                &rule.vars,
                frame_mut(&mut self.regs, nvars, op_index),
                &filter,
                store.table_ids(table),
                column,
            );
        }
        set_column(&mut self.components, op, Some(store.table_ids(table)), column);
        true
    }

    fn eval_with(&mut self, op: &Op, op_index: usize, redo: bool) -> bool {
        let rule = self.rule;
        let store = rule.store;
        let nvars = rule.vars.len();
        let nterms = rule.terms.len();
        let r = op.r_in;

        let last_op = self.op_ctx[op_index].last_op;
        let filter = pair_to_filter(frame(&self.regs, nvars, last_op), op.pair);

        // A concrete filter matches a table at most once.
        if redo && !filter.wildcard {
            return false;
        }

        if !redo && op.pair.transitive {
            // Transitive terms are inclusive: equal subject and object
            // match even without a stored relationship.
            let subj = match r {
                None => Some(op.subject),
                Some(ri) if rule.vars[ri].kind == VarKind::Entity => {
                    Some(entity_reg_get(frame(&self.regs, nvars, op_index), ri))
                }
                _ => None,
            };
            if let Some(subj) = subj {
                if !filter.obj_wildcard && subj == filter.mask.lo() {
                    if op.column != NO_COLUMN {
                        self.components[op.column as usize] = filter.mask;
                    }
                    return true;
                }
            }
        }

        let OpCtx::With(ctx) = &mut self.op_ctx[op_index].ctx else {
            unreachable!("with context");
        };
        if !redo {
            ctx.table_set = store.resolve_table_set(filter.mask);
        }
        // Without a table set there is nothing the filter can match, no
        // matter what the input register holds.
        let Some(set) = ctx.table_set else {
            return false;
        };

        let Some(table) = reg_get_table(store, &rule.vars, op, frame(&self.regs, nvars, op_index), r)
        else {
            return false;
        };

        let start = if !redo {
            // O(1) membership check: a table missing from the set does
            // not have the required id at all.
            let Some(record) = set.get(table) else {
                return false;
            };
            record.column
        } else {
            (ctx.cur_column + 1) as usize
        };

        let Some(column) = find_next_match(store.table_ids(table), start, &filter) else {
            return false;
        };
        ctx.cur_column = column as i32;
        if op.column != NO_COLUMN {
            self.columns[op_index * nterms + op.column as usize] = column as i32;
        }

        if filter.wildcard {
            reify_variables(
                &rule.vars,
                frame_mut(&mut self.regs, nvars, op_index),
                &filter,
                store.table_ids(table),
                column,
            );
        }
        set_column(&mut self.components, op, Some(store.table_ids(table)), column);
        true
    }

    fn eval_subset(&mut self, op: &Op, op_index: usize, redo: bool) -> bool {
        let rule = self.rule;
        let store = rule.store;
        let nvars = rule.vars.len();
        let Some(r) = op.r_out else {
            unreachable!("subset writes a register");
        };

        let last_op = self.op_ctx[op_index].last_op;
        let mut pair = op.pair;
        let mut filter = pair_to_filter(frame(&self.regs, nvars, last_op), pair);

        let OpCtx::SubSet(ctx) = &mut self.op_ctx[op_index].ctx else {
            unreachable!("subset context");
        };

        if !redo {
            ctx.stack.clear();
            ctx.sp = 0;
            let mut with = WithCtx { table_set: store.resolve_table_set(filter.mask), ..WithCtx::default() };
            let Some(set) = with.table_set else {
                return false;
            };
            let Some((table, column)) = find_next_table(store, set, &filter, &mut with) else {
                return false;
            };
            ctx.stack.push(SubSetFrame { with, table, row: 0, column: column as i32 });
            table_reg_set(&rule.vars, frame_mut(&mut self.regs, nvars, op_index), r, table);
            set_column(&mut self.components, op, Some(store.table_ids(table)), column);
            return true;
        }

        loop {
            // Exhausted rows: advance to the frame's next table, popping
            // frames whose sets have run dry.
            loop {
                let sp = ctx.sp;
                let fr = &mut ctx.stack[sp];
                if fr.row < store.table_row_count(fr.table) {
                    break;
                }
                let Some(set) = fr.with.table_set else {
                    unreachable!("pushed subset frames have a table set");
                };
                if let Some((table, column)) = find_next_table(store, set, &filter, &mut fr.with) {
                    fr.table = table;
                    fr.row = 0;
                    fr.column = column as i32;
                    set_column(&mut self.components, op, Some(store.table_ids(table)), column);
                    table_reg_set(&rule.vars, frame_mut(&mut self.regs, nvars, op_index), r, table);
                    return true;
                }
                if sp == 0 {
                    // No frame yielded anything more.
                    return false;
                }
                ctx.sp -= 1;
                ctx.stack[ctx.sp].row += 1;
            }

            // Descend: follow the relation from each row entity of the
            // current table into a deeper table set.
            let mut descended = false;
            loop {
                let sp = ctx.sp;
                let cur = ctx.stack[sp];
                let row_count = store.table_row_count(cur.table);
                debug_assert!(cur.row < row_count);
                let entity = store.table_row_entities(cur.table)[cur.row];

                pair.obj = PairArg::Id(entity);
                filter = pair_to_filter(frame(&self.regs, nvars, last_op), pair);

                if let Some(set) = store.resolve_table_set(filter.mask) {
                    let mut with = WithCtx { table_set: Some(set), ..WithCtx::default() };
                    if let Some((table, column)) = find_next_table(store, set, &filter, &mut with) {
                        set_frame(
                            &mut ctx.stack,
                            sp + 1,
                            SubSetFrame { with, table, row: 0, column: column as i32 },
                        );
                        ctx.sp = sp + 1;
                        descended = true;
                        break;
                    }
                }

                // Nothing below this entity: try the next row.
                ctx.stack[sp].row += 1;
                if ctx.stack[sp].row >= row_count {
                    break;
                }
            }

            if descended {
                let fr = ctx.stack[ctx.sp];
                table_reg_set(&rule.vars, frame_mut(&mut self.regs, nvars, op_index), r, fr.table);
                set_column(&mut self.components, op, Some(store.table_ids(fr.table)), fr.column as usize);
                return true;
            }
        }
    }

    fn eval_superset(&mut self, op: &Op, op_index: usize, redo: bool) -> bool {
        let rule = self.rule;
        let store = rule.store;
        let nvars = rule.vars.len();
        let Some(r) = op.r_out else {
            unreachable!("superset writes a register");
        };
        debug_assert_eq!(rule.vars[r].kind, VarKind::Entity);

        let last_op = self.op_ctx[op_index].last_op;
        let mut filter = pair_to_filter(frame(&self.regs, nvars, last_op), op.pair);
        let PairArg::Id(pred) = op.pair.pred else {
            unreachable!("superset predicates are literals");
        };
        // The climb scans for any (pred, *) edge and follows its object.
        let mask = Id::pair(pred, Id::WILDCARD);

        let OpCtx::SuperSet(ctx) = &mut self.op_ctx[op_index].ctx else {
            unreachable!("superset context");
        };

        if !redo {
            ctx.stack.clear();
            ctx.table_set = store.resolve_table_set(mask);
            // No tables for the relationship at all: no supersets.
            if ctx.table_set.is_none() {
                return false;
            }

            let obj = filter.mask.lo();
            debug_assert_ne!(obj, Id::WILDCARD);
            let Some(loc) = store.entity_location(obj) else {
                return false;
            };

            filter.mask = mask;
            filter.set_expr_mask(mask);
            let ids = store.table_ids(loc.table);
            let Some(column) = find_next_match(ids, 0, &filter) else {
                return false;
            };

            let col_obj = ids[column].lo();
            entity_reg_set(&rule.vars, frame_mut(&mut self.regs, nvars, op_index), r, col_obj);
            set_column(&mut self.components, op, Some(ids), column);
            ctx.stack.push(SuperSetFrame { table: loc.table, column: column as i32 });
            return true;
        }

        filter.mask = mask;
        filter.set_expr_mask(mask);

        let mut sp = (ctx.stack.len() - 1) as i32;
        let top = ctx.stack[sp as usize];
        let col_obj = store.table_ids(top.table)[top.column as usize].lo();
        if let Some(next) = store.entity_location(col_obj) {
            sp += 1;
            set_frame(&mut ctx.stack, sp as usize, SuperSetFrame { table: next.table, column: -1 });
        }

        loop {
            let fr = ctx.stack[sp as usize];
            let ids = store.table_ids(fr.table);
            if let Some(column) = find_next_match(ids, (fr.column + 1) as usize, &filter) {
                ctx.stack.truncate(sp as usize + 1);
                ctx.stack[sp as usize].column = column as i32;
                let col_obj = ids[column].lo();
                entity_reg_set(&rule.vars, frame_mut(&mut self.regs, nvars, op_index), r, col_obj);
                set_column(&mut self.components, op, Some(ids), column);
                return true;
            }
            sp -= 1;
            if sp < 0 {
                return false;
            }
        }
    }

    fn eval_each(&mut self, op: &Op, op_index: usize, redo: bool) -> bool {
        let rule = self.rule;
        let store = rule.store;
        let nvars = rule.vars.len();
        let (Some(r_in), Some(r_out)) = (op.r_in, op.r_out) else {
            unreachable!("each reads and writes registers");
        };
        debug_assert_eq!(rule.vars[r_in].kind, VarKind::Table);
        debug_assert_eq!(rule.vars[r_out].kind, VarKind::Entity);

        let range = table_range_get(frame(&self.regs, nvars, op_index), r_in);
        let Some(table) = range.table else {
            unreachable!("each input table is populated");
        };

        // A zero count means the whole table; upstream ops never forward
        // empty tables.
        let offset = range.offset;
        let count = if range.count == 0 {
            let count = store.table_row_count(table);
            debug_assert_ne!(count, 0);
            count
        } else {
            range.count + offset
        };

        let OpCtx::Each(ctx) = &mut self.op_ctx[op_index].ctx else {
            unreachable!("each context");
        };
        let mut row = if !redo {
            ctx.row = offset;
            offset
        } else {
            ctx.row += 1;
            ctx.row
        };
        if row >= count {
            return false;
        }

        // Skip builtin entities that would confuse later ops.
        let entities = store.table_row_entities(table);
        let mut entity = entities[row];
        while entity == Id::WILDCARD || entity == Id::THIS {
            row += 1;
            if row == count {
                return false;
            }
            entity = entities[row];
        }
        ctx.row = row;

        entity_reg_set(&rule.vars, frame_mut(&mut self.regs, nvars, op_index), r_out, entity);
        true
    }

    fn eval_store(&mut self, op: &Op, op_index: usize, redo: bool) -> bool {
        // Single shot.
        if redo {
            return false;
        }
        let rule = self.rule;
        let store = rule.store;
        let nvars = rule.vars.len();
        let Some(r_out) = op.r_out else {
            unreachable!("store writes a register");
        };

        let entity = reg_get_entity(store, &rule.vars, op, frame(&self.regs, nvars, op_index), op.r_in);
        reg_set_entity(store, &rule.vars, frame_mut(&mut self.regs, nvars, op_index), r_out, entity);

        if op.column != NO_COLUMN {
            let last_op = self.op_ctx[op_index].last_op;
            let filter = pair_to_filter(frame(&self.regs, nvars, last_op), op.pair);
            self.components[op.column as usize] = filter.mask;
        }
        true
    }

    fn eval_setjmp(&mut self, op: &Op, op_index: usize, redo: bool) -> bool {
        let OpCtx::SetJmp(ctx) = &mut self.op_ctx[op_index].ctx else {
            unreachable!("setjmp context");
        };
        if !redo {
            ctx.label = op.on_pass;
            true
        } else {
            ctx.label = op.on_fail;
            false
        }
    }

    /// Copy one op's registers and columns into another op's frame.
    fn push_frames(&mut self, from: usize, to: usize) {
        let nvars = self.rule.vars.len();
        if nvars != 0 {
            self.regs.copy_within(from * nvars..(from + 1) * nvars, to * nvars);
        }
        let nterms = self.rule.terms.len();
        if nterms != 0 {
            self.columns.copy_within(from * nterms..(from + 1) * nterms, to * nterms);
        }
    }

    /// Expose the result the program arrived at to the accessors.
    fn populate(&mut self, op: &Op, op_index: usize) {
        let rule = self.rule;
        let store = rule.store;
        let nvars = rule.vars.len();
        let nterms = rule.terms.len();

        let Some(r) = op.r_in else {
            // No `.` variable: the rule only answers true or false, and
            // the resolved variables remain readable.
            self.table = None;
            self.offset = 0;
            self.count = 0;
            return;
        };

        let fr = frame(&self.regs, nvars, op_index);
        match rule.vars[r].kind {
            VarKind::Table => {
                let range = table_range_get(fr, r);
                let Some(table) = range.table else {
                    unreachable!("yielded table register is populated");
                };
                self.table = Some(table);
                self.offset = range.offset;
                self.count = if range.count != 0 {
                    range.count
                } else {
                    store.table_row_count(table)
                };
            }
            _ => {
                let entity = entity_reg_get(fr, r);
                let Some(loc) = store.entity_location(entity) else {
                    unreachable!("yielded entities are stored");
                };
                self.table = Some(loc.table);
                self.offset = loc.row;
                self.count = 1;
            }
        }
        debug_assert_ne!(self.count, 0);

        // The public contract numbers term columns from 1. The slice is
        // private to the yield frame, which is re-pushed on every pass.
        for column in &mut self.columns[op_index * nterms..(op_index + 1) * nterms] {
            *column += 1;
        }
    }

    fn release(&mut self) {
        self.regs = Vec::new();
        self.columns = Vec::new();
        self.op_ctx = Vec::new();
        self.components = Vec::new();
    }

    /// Table of the current result, if the rule has a `.` variable.
    pub fn table(&self) -> Option<TableId> {
        self.table
    }

    /// Number of entities in the current result.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Row offset of the current result within its table.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Entities of the current result.
    pub fn entities(&self) -> &[Id] {
        match self.table {
            Some(table) => {
                let rows = self.rule.store.table_row_entities(table);
                &rows[self.offset..self.offset + self.count]
            }
            None => &[],
        }
    }

    /// Per-term column indices into the result table's type, numbered
    /// from 1.
    pub fn columns(&self) -> &[i32] {
        let nterms = self.rule.terms.len();
        let yield_op = self.rule.ops.len() - 1;
        if self.columns.len() < (yield_op + 1) * nterms {
            return &[];
        }
        &self.columns[yield_op * nterms..(yield_op + 1) * nterms]
    }

    /// Per-term resolved ids of the current result.
    pub fn components(&self) -> &[Id] {
        &self.components
    }

    /// Value of an entity variable in the current result, or the null id
    /// for table variables and exhausted iterators.
    pub fn variable_value(&self, var: usize) -> Id {
        let nvars = self.rule.vars.len();
        let last = self.rule.ops.len() - 1;
        if var >= nvars
            || self.rule.vars[var].kind != VarKind::Entity
            || self.regs.len() < (last + 1) * nvars
        {
            return Id::NULL;
        }
        entity_reg_get(frame(&self.regs, nvars, last), var)
    }
}
