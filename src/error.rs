//! Compile-error types

/// Errors reported while compiling a rule.
///
/// Every variant carries the rendered rule expression so a one-line
/// diagnostic can point back at the input. Parse failures never reach the
/// solver; they are the parser's to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// A term has an invalid number of arguments (at most two).
    TermArity { expr: String, term: usize },
    /// More than [`crate::solver::MAX_VARIABLE_COUNT`] variables in one rule.
    VariableLimit { expr: String },
    /// A subject variable is unreachable from the root.
    UnconstrainedVariable { expr: String, name: String },
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TermArity { expr, term } => {
                write!(f, "error: {}: too many arguments for term {}", expr, term)
            }
            Self::VariableLimit { expr } => {
                write!(f, "error: {}: too many variables in rule", expr)
            }
            Self::UnconstrainedVariable { expr, name } => {
                write!(f, "error: {}: unconstrained variable '{}'", expr, name)
            }
        }
    }
}

impl std::error::Error for RuleError {}

/// Result type for rule compilation.
pub type RuleResult<T> = Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_expression() {
        let err = RuleError::UnconstrainedVariable {
            expr: "Likes(., X), Foo(Y, Z)".to_string(),
            name: "Y".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Likes(., X)"));
        assert!(msg.contains("'Y'"));
    }
}
