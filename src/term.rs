//! Parsed rule terms
//!
//! The solver consumes rules as a list of terms; turning rule text into
//! terms is the job of an external parser. A term applies a predicate to a
//! subject and, optionally, an object. Each of the three positions holds
//! either a concrete entity, a named variable, or the implicit subject `.`.

use crate::id::Id;

/// One position of a term: a concrete entity, a variable, or `.`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TermArg {
    Entity(Id),
    Var(String),
    This,
}

impl TermArg {
    /// The variable name this argument binds to, if any. `This` is the
    /// variable named `.`.
    pub fn var_name(&self) -> Option<&str> {
        match self {
            TermArg::Entity(_) => None,
            TermArg::Var(name) => Some(name),
            TermArg::This => Some("."),
        }
    }

    pub fn entity(&self) -> Option<Id> {
        match self {
            TermArg::Entity(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<Id> for TermArg {
    fn from(id: Id) -> Self {
        TermArg::Entity(id)
    }
}

impl From<&str> for TermArg {
    fn from(name: &str) -> Self {
        if name == "." {
            TermArg::This
        } else {
            TermArg::Var(name.to_string())
        }
    }
}

/// A single term: a predicate applied to a subject and optional object.
///
/// `args[0]` is the subject, `args[1]` the object. The fields are public
/// so callers standing in for a parser can build arbitrary argument lists;
/// the compiler rejects terms with more than two arguments.
#[derive(Clone, Debug)]
pub struct Term {
    pub pred: TermArg,
    pub args: Vec<TermArg>,
}

impl Term {
    /// `Pred(Subj)`
    pub fn tag(pred: impl Into<TermArg>, subject: impl Into<TermArg>) -> Self {
        Term { pred: pred.into(), args: vec![subject.into()] }
    }

    /// `Pred(Subj, Obj)`
    pub fn pair(
        pred: impl Into<TermArg>,
        subject: impl Into<TermArg>,
        object: impl Into<TermArg>,
    ) -> Self {
        Term { pred: pred.into(), args: vec![subject.into(), object.into()] }
    }

    pub fn subject(&self) -> Option<&TermArg> {
        self.args.first()
    }

    pub fn object(&self) -> Option<&TermArg> {
        self.args.get(1)
    }

    /// A fact holds no variables in any position.
    pub fn is_fact(&self) -> bool {
        self.pred.var_name().is_none() && self.args.iter().all(|a| a.var_name().is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_names() {
        assert_eq!(TermArg::from("X").var_name(), Some("X"));
        assert_eq!(TermArg::from(".").var_name(), Some("."));
        assert_eq!(TermArg::Entity(Id(7)).var_name(), None);
    }

    #[test]
    fn test_fact_detection() {
        let fact = Term::pair(Id(10), Id(11), Id(12));
        assert!(fact.is_fact());
        let open = Term::pair(Id(10), TermArg::This, "X");
        assert!(!open.is_fact());
    }
}
