//! Compiled program data model
//!
//! A rule compiles into a flat array of ops. Each op carries an optional
//! pair (the compile-time view of a term's predicate and object), jump
//! labels, and optional input/output registers. At run time a pair turns
//! into a filter by substituting the values of already-reified variables.

use crate::id::{Id, ROLE_MASK};
use crate::store::TableId;

/// Sentinel for ops without a signature column.
pub(crate) const NO_COLUMN: i32 = -1;

/// One side of a pair: absent, a literal id, or a variable register.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub(crate) enum PairArg {
    #[default]
    None,
    Id(Id),
    Var(usize),
}

impl PairArg {
    pub(crate) fn is_none(self) -> bool {
        self == PairArg::None
    }
}

/// Compile-time descriptor of a term's predicate and object.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Pair {
    pub pred: PairArg,
    pub obj: PairArg,
    /// The predicate carries the transitive meta tag (two-argument terms).
    pub transitive: bool,
    /// The predicate is exempt from implicit IsA expansion.
    pub final_pred: bool,
}

/// Kinds of program ops.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpKind {
    /// Entry point. Passes once, fails on redo, which ends the program.
    Input,
    /// Enumerates every (table, column) matching the filter.
    Select,
    /// Applies the filter to a table or entity already in a register.
    With,
    /// Transitive downward closure: all tables reached by following the
    /// predicate from the object.
    SubSet,
    /// Transitive upward closure: all entities reached by following the
    /// predicate up from the subject.
    SuperSet,
    /// Copies an entity into an output register. Single shot.
    Store,
    /// Forwards each row entity of a table register.
    Each,
    /// Two-target branch: records where a later Jump should land.
    SetJmp,
    /// Goto through the label stored by its SetJmp.
    Jump,
    /// Suspends the program and hands a result to the iterator.
    Yield,
}

impl OpKind {
    /// Control-flow ops do not get a register frame of their own.
    pub(crate) fn is_control_flow(self) -> bool {
        matches!(self, OpKind::SetJmp | OpKind::Jump)
    }
}

/// A single program op.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Op {
    pub kind: OpKind,
    pub pair: Pair,
    /// Constant subject, when the term names a literal entity.
    pub subject: Id,
    /// Next op when the op passes. Almost always the next index.
    pub on_pass: i32,
    /// Next op when the op fails. Almost always the previous index.
    pub on_fail: i32,
    /// Signature column of the originating term, or [`NO_COLUMN`].
    pub column: i32,
    pub r_in: Option<usize>,
    pub r_out: Option<usize>,
    pub has_in: bool,
    pub has_out: bool,
}

impl Default for Op {
    fn default() -> Self {
        Op {
            kind: OpKind::Input,
            pair: Pair::default(),
            subject: Id::NULL,
            on_pass: 0,
            on_fail: 0,
            column: NO_COLUMN,
            r_in: None,
            r_out: None,
            has_in: false,
            has_out: false,
        }
    }
}

/// A table register value: a table plus an optional row slice. A zero
/// count means the whole table.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TableRange {
    pub table: Option<TableId>,
    pub offset: usize,
    pub count: usize,
}

/// A register value. The variant is fixed by the register's variable kind.
#[derive(Clone, Copy, Debug)]
pub(crate) enum RegValue {
    Entity(Id),
    Table(TableRange),
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Register {
    pub var: usize,
    pub value: RegValue,
}

/// Runtime filter derived from a pair after variable substitution.
///
/// `expr_mask`/`expr_match` form the AND/compare check used to scan a
/// table's ids: `e` matches iff `(e & expr_mask) == expr_match`. They are
/// only populated for wildcard filters: a fully concrete filter is
/// already guaranteed to match at the column the table set reported, so
/// its check degenerates to always-true.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Filter {
    pub mask: Id,
    pub expr_mask: u64,
    pub expr_match: u64,
    pub wildcard: bool,
    pub pred_wildcard: bool,
    pub obj_wildcard: bool,
    /// Predicate and object are the same variable: matched ids must have
    /// equal high and low fields.
    pub same_var: bool,
    /// Variable reified from the low field of a match.
    pub lo_var: Option<usize>,
    /// Variable reified from the high field of a match.
    pub hi_var: Option<usize>,
}

impl Filter {
    /// Build the AND/compare masks for `mask`. Non-wildcard fields
    /// contribute all-ones to the mask and their value to the match;
    /// wildcard fields contribute zero to both. Role bits always carry
    /// over so pairs never match plain ids.
    pub(crate) fn set_expr_mask(&mut self, mask: Id) {
        let lo = mask.lo();
        let hi = mask.hi();

        self.expr_mask = mask.0 & ROLE_MASK;
        self.expr_match = mask.0 & ROLE_MASK;

        if lo != Id::WILDCARD {
            self.expr_mask |= 0xFFFF_FFFF;
            self.expr_match |= lo.0;
        }
        if hi != Id::WILDCARD {
            self.expr_mask |= 0xFFFF_FFFF_u64 << 32;
            self.expr_match |= hi.0 << 32;
        }
    }
}

/// Scan a table's ids from `start` for the next filter match.
///
/// Ids are sorted, so when the predicate field is concrete a scan that
/// starts past the beginning only needs to test the next position: either
/// it continues the predicate's contiguous region or the region is over.
pub(crate) fn find_next_match(ids: &[Id], start: usize, filter: &Filter) -> Option<usize> {
    let mut count = ids.len();
    if !filter.pred_wildcard && start > 0 && start < count {
        count = start + 1;
    }

    for (i, id) in ids.iter().enumerate().take(count).skip(start) {
        if id.0 & filter.expr_mask == filter.expr_match {
            if filter.same_var && id.lo() != id.hi() {
                continue;
            }
            return Some(i);
        }
    }

    None
}
