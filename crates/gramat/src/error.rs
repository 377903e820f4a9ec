use thiserror::Error;

/// Everything the engine can report to a caller.
///
/// Backtracking failures inside the matcher are ordinary control flow and
/// never surface here; only configuration problems and terminal parse
/// failure do.
#[derive(Debug, Error)]
pub enum GrammarError {
    /// A rule id was required but is absent from the rule map. Also raised
    /// when a grammar definition references ids it never declares, in which
    /// case the message names every unresolved id.
    #[error("missing rule definition: {0}")]
    MissingRule(String),

    /// The start rule, skip rule, a rule id, or a rule's listener was
    /// declared more than once.
    #[error("{0} is already defined")]
    Reassignment(String),

    /// A listener asserted a structural family that disagrees with the
    /// rule's actual definition. Detected at registration time.
    #[error("rule '{rule}' is declared as {actual}, listener expects {expected}")]
    RuleMismatch {
        rule: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A typed accessor was invoked on a token whose origin does not belong
    /// to the asserted family. Detected while walking the token tree.
    #[error("token of rule '{rule}': {message}")]
    TokenMismatch { rule: String, message: String },

    /// The start rule failed to match, input remained after a successful
    /// match, or a listener aborted the walk. Carries the input byte offset.
    #[error("{message} at offset {offset}")]
    ParseFailure { message: String, offset: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GrammarError {
    pub(crate) fn token_mismatch(rule: &str, message: impl ToString) -> GrammarError {
        GrammarError::TokenMismatch {
            rule: rule.to_owned(),
            message: message.to_string(),
        }
    }
}
