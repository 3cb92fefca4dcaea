//! Tagged result type shared by every fallible operation in the core.
//!
//! Every operation returns `ok` or one of a fixed set of structural error
//! kinds. `iterator_end` is represented natively as `None` from
//! `Iterator::next` rather than folded into this enum, and the visitor
//! short-circuit value (`yield`) is modeled separately as `ControlFlow`
//! (see [`crate::error::Yield`]) so it can never be mistaken for a real
//! error.

use core::fmt;

/// A source location attached to an error when the call site that raised
/// it has one available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

/// The structural error kinds a core operation can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    OutOfBounds,
    NotFound,
    AlreadyExists,
    MemallocFailure,
    ObjallocFailure,
    InternalError,
    InvalidChange,
    InvalidState,
    NotSupported,
    NoMatch,
    LexerError,
    SyntaxError,
    AnalysisError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::OutOfBounds => "out of bounds",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::MemallocFailure => "memory allocation failure",
            ErrorKind::ObjallocFailure => "object allocation failure",
            ErrorKind::InternalError => "internal error",
            ErrorKind::InvalidChange => "invalid change",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::NoMatch => "no match",
            ErrorKind::LexerError => "lexer error",
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::AnalysisError => "analysis error",
        };
        f.write_str(s)
    }
}

/// The core's error type: a structural error kind, a human-readable
/// message, and an optional source location.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl CoreError {
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let loc = core::panic::Location::caller();
        CoreError {
            kind,
            message: message.into(),
            location: Some(SourceLocation {
                file: loc.file(),
                line: loc.line(),
                column: loc.column(),
            }),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub type Result<T> = core::result::Result<T, CoreError>;

/// Distinct control-flow signal used by tree/IR visitors to short-circuit
/// traversal without signalling failure. Kept separate from [`CoreError`]
/// on purpose: a visitor stopping early is not a bug, so it must not be
/// representable as one.
pub type Yield<C> = core::ops::ControlFlow<(), C>;

#[macro_export]
macro_rules! require {
    ($cond:expr, $kind:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::error::CoreError::new($kind, $msg));
        }
    };
}
