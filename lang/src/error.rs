use crate::{
    source::{self, FileSpan},
    types::Type,
};

/// Errors in the compiled program. Linker failures are reported through
/// [`crate::linker::Error`] instead, since they indicate a compiler bug.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("undefined symbol {name:?}")]
    UndefinedSymbol { name: String },

    #[error("{name:?} is already defined in this scope")]
    AlreadyDefined { name: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: Type, found: Type },

    #[error("incompatible types in {context}: {reason}")]
    IncompatibleTypes { context: String, reason: String },

    #[error("cannot assign to constant {name:?}")]
    WriteToConst { name: String },

    #[error("{name} takes {expected} arguments, found {found}")]
    InvalidArgCount {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("{statement} outside of {context}")]
    InvalidControlFlow {
        statement: &'static str,
        context: &'static str,
    },

    #[error("{name:?} is not a value")]
    NotAValue { name: String },

    #[error("{name:?} is not callable")]
    NotCallable { name: String },
}

impl ErrorKind {
    pub fn at(self, span: FileSpan) -> Error {
        Error {
            span: Some(span),
            kind: self,
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub span: Option<FileSpan>,
    pub kind: ErrorKind,
}

impl Error {
    pub fn into_user(self, sources: &source::Sources) -> UserError {
        UserError {
            location: self.span.map(|s| s.location(sources)),
            kind: self.kind,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { span: None, kind }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(span) = &self.span {
            write!(f, "at {:?}: ", span)?;
        } else {
            write!(f, "at <unknown location>: ")?;
        }
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {}

/// An [`Error`] resolved against its source text.
#[derive(Debug)]
pub struct UserError {
    pub location: Option<source::Location>,
    pub kind: ErrorKind,
}

impl std::fmt::Display for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(location) = &self.location else {
            return write!(f, "<unknown location>: {}", self.kind);
        };
        writeln!(f, "{}: {}", location, self.kind)?;
        writeln!(f, "    {}", location.text)?;
        write!(f, "    {}^", " ".repeat(location.col.saturating_sub(1)))
    }
}

impl std::error::Error for UserError {}
