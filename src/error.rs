//! Error types shared by every subsystem

use std::fmt;

use thiserror::Error;

/// Stable numeric classification of a failure, kept in the last-error slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Unspecified = 0,
    NoSuchClass = 1,
    NoSuchEvent = 2,
    NoSuchVariable = 3,
    NoSuchPath = 4,
    TypeMismatch = 5,
    StringTooLong = 6,
    VersionMismatch = 7,
    Truncated = 8,
    BadTypeTag = 9,
    PathOverflow = 10,
    MalformedSpec = 11,
    UndefinedNamespace = 12,
    ModuleLoad = 13,
    DuplicateName = 14,
    TooManyArgs = 15,
    NotAttached = 16,
    Terminating = 17,
    Io = 18,
    ClassInUse = 19,
    Cycle = 20,
    InvalidName = 21,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Core runtime errors
#[derive(Debug, Error)]
pub enum CoreError {
    // Class registry
    #[error("no such class: {0}")]
    NoSuchClass(String),

    #[error("malformed class spec \"{spec}\": {reason}")]
    MalformedSpec { spec: String, reason: String },

    #[error("undefined namespace: {0}")]
    UndefinedNamespace(String),

    #[error("cannot load module {module}: {reason}")]
    ModuleLoad { module: String, reason: String },

    #[error("class {0} is still in use")]
    ClassInUse(String),

    // Objects and variables
    #[error("no such variable: {0}")]
    NoSuchVariable(String),

    #[error("variable {key}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("name \"{0}\" is already in use")]
    DuplicateName(String),

    #[error("invalid object name \"{0}\"")]
    InvalidName(String),

    #[error("object {0} is not attached")]
    NotAttached(String),

    #[error("object {0} is being destroyed")]
    Terminating(String),

    #[error("attaching {0} would create a cycle")]
    Cycle(String),

    // Events
    #[error("no such event: {0}")]
    NoSuchEvent(String),

    #[error("too many event arguments ({0} > {1})")]
    TooManyArgs(usize, usize),

    // Codec
    #[error("string too long ({0} > {1} bytes)")]
    StringTooLong(usize, usize),

    #[error("version mismatch for {name}: expected {expected}, found {found}")]
    VersionMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("truncated read: wanted {0} bytes")]
    Truncated(usize),

    #[error("bad type tag: expected {expected:#04x}, found {found:#04x}")]
    BadTypeTag { expected: u8, found: u8 },

    // Search paths
    #[error("no such file in search path: {0}")]
    NoSuchPath(String),

    #[error("path too long ({0} > {1} bytes)")]
    PathOverflow(usize, usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Classification stored alongside the message in the last-error slot
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::NoSuchClass(_) => ErrorCode::NoSuchClass,
            CoreError::MalformedSpec { .. } => ErrorCode::MalformedSpec,
            CoreError::UndefinedNamespace(_) => ErrorCode::UndefinedNamespace,
            CoreError::ModuleLoad { .. } => ErrorCode::ModuleLoad,
            CoreError::ClassInUse(_) => ErrorCode::ClassInUse,
            CoreError::NoSuchVariable(_) => ErrorCode::NoSuchVariable,
            CoreError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            CoreError::DuplicateName(_) => ErrorCode::DuplicateName,
            CoreError::InvalidName(_) => ErrorCode::InvalidName,
            CoreError::NotAttached(_) => ErrorCode::NotAttached,
            CoreError::Terminating(_) => ErrorCode::Terminating,
            CoreError::Cycle(_) => ErrorCode::Cycle,
            CoreError::NoSuchEvent(_) => ErrorCode::NoSuchEvent,
            CoreError::TooManyArgs(..) => ErrorCode::TooManyArgs,
            CoreError::StringTooLong(..) => ErrorCode::StringTooLong,
            CoreError::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            CoreError::Truncated(_) => ErrorCode::Truncated,
            CoreError::BadTypeTag { .. } => ErrorCode::BadTypeTag,
            CoreError::NoSuchPath(_) => ErrorCode::NoSuchPath,
            CoreError::PathOverflow(..) => ErrorCode::PathOverflow,
            CoreError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                ErrorCode::Truncated
            }
            CoreError::Io(_) => ErrorCode::Io,
        }
    }

    /// Configuration errors that cannot be recovered from at startup
    pub fn is_fatal_at_init(&self) -> bool {
        matches!(
            self,
            CoreError::MalformedSpec { .. } | CoreError::UndefinedNamespace(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
