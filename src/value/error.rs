use crate::ast::Pos;

/// The closed set of user-visible failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    WrongArgumentCount {
        expected: usize,
        actual: usize,
        variadic: bool,
    },
    InvalidCast,
    InvalidOperation,
    InvalidAssignment,
    ModuleNotFound,
    InvalidNumberLiteral,
    UnexpectedClosure,
    ExpectedClosure,
    Runtime,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::WrongArgumentCount { .. } => "WRONG_ARGUMENT_COUNT",
            ErrorKind::InvalidCast => "INVALID_CAST",
            ErrorKind::InvalidOperation => "INVALID_OPERATION",
            ErrorKind::InvalidAssignment => "INVALID_ASSIGNMENT",
            ErrorKind::ModuleNotFound => "MODULE_NOT_FOUND",
            ErrorKind::InvalidNumberLiteral => "INVALID_NUMBER_LITERAL",
            ErrorKind::UnexpectedClosure => "UNEXPECTED_CLOSURE",
            ErrorKind::ExpectedClosure => "EXPECTED_CLOSURE",
            ErrorKind::Runtime => "RUNTIME",
        }
    }
}

/// A runtime or analysis failure. Every error carries a human message;
/// the position is attached once the error crosses the analyser or
/// executor boundary.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Option<Pos>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            pos: None,
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found", what))
    }

    pub fn wrong_argument_count(expected: usize, actual: usize, variadic: bool) -> Self {
        let message = if variadic {
            format!(
                "wrong number of arguments: expected {} (variadic), got {}",
                expected, actual
            )
        } else {
            format!(
                "wrong number of arguments: expected {}, got {}",
                expected, actual
            )
        };
        Self::new(
            ErrorKind::WrongArgumentCount {
                expected,
                actual,
                variadic,
            },
            message,
        )
    }

    pub fn invalid_cast(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidCast,
            format!("cannot cast {} to {}", from, to),
        )
    }

    pub fn invalid_operation(detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidOperation,
            format!("invalid operation: {}", detail),
        )
    }

    pub fn invalid_assignment() -> Self {
        Self::new(ErrorKind::InvalidAssignment, "invalid assignment target")
    }

    pub fn module_not_found(path: &[String]) -> Self {
        Self::new(
            ErrorKind::ModuleNotFound,
            format!("module not found: {}", path.join("::")),
        )
    }

    pub fn invalid_number_literal(text: &str) -> Self {
        Self::new(
            ErrorKind::InvalidNumberLiteral,
            format!("invalid number literal: {}", text),
        )
    }

    pub fn unexpected_closure() -> Self {
        Self::new(
            ErrorKind::UnexpectedClosure,
            "closure given to a callee that does not take one",
        )
    }

    pub fn expected_closure() -> Self {
        Self::new(
            ErrorKind::ExpectedClosure,
            "no closure available in this context",
        )
    }

    /// Attach a position unless one was already recorded closer to the
    /// failure site.
    pub fn at(mut self, pos: Pos) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
        self
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pos {
            Some(pos) => write!(f, "[{}] {} at {}", self.kind.name(), self.message, pos),
            None => write!(f, "[{}] {}", self.kind.name(), self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}
