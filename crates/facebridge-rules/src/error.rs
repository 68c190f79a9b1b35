//! Error types for rule loading and expression parsing

use facebridge_core::ErrorKind;
use thiserror::Error;

/// Expression parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Empty expression")]
    Empty,

    #[error("Unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("Invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("Unexpected token {found} at {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{name}' expects {expected} arguments, got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Expression nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("Expression longer than {0} tokens")]
    TooLong(usize),
}

/// Reasons a single rule definition is rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("Malformed rule entry: {0}")]
    Malformed(String),

    #[error("Rule name is empty")]
    EmptyName,

    #[error("Rule name '{0}' is not a valid identifier")]
    InvalidName(String),

    #[error("Rule name '{0}' shadows a tracking frame field")]
    ShadowsFrameField(String),

    #[error("Duplicate rule name '{0}'")]
    DuplicateName(String),

    #[error("Bounds are not finite")]
    NonFiniteBounds,

    #[error("min ({min}) is greater than max ({max})")]
    InvertedBounds { min: f64, max: f64 },

    #[error("Default value is not finite")]
    NonFiniteDefault,

    #[error("Invalid expression: {0}")]
    Expression(#[from] ExprError),

    #[error("Depends on rejected rule '{0}'")]
    RejectedDependency(String),

    #[error("Invalid interpolation: {0}")]
    Interpolation(String),
}

impl RuleError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// Errors from the rule file watcher
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Rule path has no parent directory: {0}")]
    NoParent(String),

    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),
}

impl WatchError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigIo
    }
}
