//! Coded errors.
//!
//! Every caller-facing failure carries a numeric [`Code`] so the boundary can
//! classify it (bad input, upstream integration, internal fault, ...) by
//! comparing codes or code ranges instead of matching on individual error
//! values. Messages stay dynamic: the code identifies the class, the message
//! describes the instance.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::ContextError;

/// Boxed source error carried by a [`CodedError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Code
// ---------------------------------------------------------------------------

/// Numeric error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Code(u32);

impl Code {
    pub const UNKNOWN: Code = Code(0);

    // General request errors.
    pub const INVALID_VALUE: Code = Code(1001);
    pub const NOT_FOUND: Code = Code(1002);
    pub const ALREADY_EXISTS: Code = Code(1003);
    pub const UNAUTHORIZED: Code = Code(1004);
    pub const INTERNAL: Code = Code(1500);

    // Context termination.
    pub const CONTEXT_CANCELED: Code = Code(2001);
    pub const DEADLINE_EXCEEDED: Code = Code(2002);

    // SMTP integration. Every SMTP failure falls inside `SMTP_START..=SMTP_END`.
    pub const SMTP_START: Code = Code(3000);
    pub const SMTP_CONNECT: Code = Code(3001);
    pub const SMTP_AUTH: Code = Code(3002);
    pub const SMTP_SEND: Code = Code(3003);
    pub const SMTP_END: Code = Code(3099);

    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn is_smtp(self) -> bool {
        CodeRange::SMTP.contains(self)
    }

    /// Symbolic name for known codes.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::UNKNOWN => "unknown",
            Self::INVALID_VALUE => "invalid_value",
            Self::NOT_FOUND => "not_found",
            Self::ALREADY_EXISTS => "already_exists",
            Self::UNAUTHORIZED => "unauthorized",
            Self::INTERNAL => "internal",
            Self::CONTEXT_CANCELED => "context_canceled",
            Self::DEADLINE_EXCEEDED => "deadline_exceeded",
            Self::SMTP_CONNECT => "smtp_connect",
            Self::SMTP_AUTH => "smtp_auth",
            Self::SMTP_SEND => "smtp_send",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Inclusive range of codes belonging to one integration or concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRange {
    pub start: Code,
    pub end: Code,
}

impl CodeRange {
    pub const SMTP: CodeRange = CodeRange {
        start: Code::SMTP_START,
        end: Code::SMTP_END,
    };

    #[must_use]
    pub fn contains(&self, code: Code) -> bool {
        self.start <= code && code <= self.end
    }
}

// ---------------------------------------------------------------------------
// CodedError
// ---------------------------------------------------------------------------

/// An error with a [`Code`], a dynamic message and an optional source.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CodedError {
    code: Code,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl CodedError {
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps `source` under `code`, keeping it reachable through `Error::source`.
    #[must_use]
    pub fn wrap(code: Code, message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ContextError> for CodedError {
    fn from(err: ContextError) -> Self {
        Self::wrap(err.code(), err.to_string(), err)
    }
}

/// Builds a [`CodedError`] with a formatted message.
///
/// ```
/// use reqscope_core::{coded, Code};
///
/// let err = coded!(Code::ALREADY_EXISTS, "email {:?} already exists", "a@b.c");
/// assert_eq!(err.code(), Code::ALREADY_EXISTS);
/// ```
#[macro_export]
macro_rules! coded {
    ($code:expr, $($arg:tt)+) => {
        $crate::error::CodedError::new($code, ::std::format!($($arg)+))
    };
}

impl ContextError {
    #[must_use]
    pub fn code(self) -> Code {
        match self {
            Self::Cancelled => Code::CONTEXT_CANCELED,
            Self::DeadlineExceeded => Code::DEADLINE_EXCEEDED,
        }
    }
}

/// Returns the code of the outermost coded error in `err`'s source chain.
///
/// A [`ContextError`] counts as coded. Anything else yields [`Code::UNKNOWN`].
#[must_use]
pub fn get_code(err: &(dyn StdError + 'static)) -> Code {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(coded) = err.downcast_ref::<CodedError>() {
            return coded.code();
        }
        if let Some(ctx) = err.downcast_ref::<ContextError>() {
            return ctx.code();
        }
        current = err.source();
    }
    Code::UNKNOWN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("repository failed")]
    struct RepoError(#[source] CodedError);

    #[test]
    fn coded_macro_formats_dynamic_message() {
        let err = coded!(Code::INVALID_VALUE, "invalid value for fields [{}]", "email, age");
        assert_eq!(err.code(), Code::INVALID_VALUE);
        assert_eq!(err.to_string(), "invalid value for fields [email, age]");
    }

    #[test]
    fn get_code_walks_source_chain() {
        let err = RepoError(CodedError::new(Code::SMTP_SEND, "relay refused"));
        assert_eq!(get_code(&err), Code::SMTP_SEND);
    }

    #[test]
    fn get_code_prefers_outermost_code() {
        let err = CodedError::wrap(Code::INTERNAL, "save failed", ContextError::Cancelled);
        assert_eq!(get_code(&err), Code::INTERNAL);
        assert!(err.source().is_some());
    }

    #[test]
    fn context_errors_have_codes() {
        assert_eq!(get_code(&ContextError::Cancelled), Code::CONTEXT_CANCELED);
        assert_eq!(get_code(&ContextError::DeadlineExceeded), Code::DEADLINE_EXCEEDED);
        let coded = CodedError::from(ContextError::DeadlineExceeded);
        assert_eq!(coded.code(), Code::DEADLINE_EXCEEDED);
    }

    #[test]
    fn uncoded_errors_are_unknown() {
        let err = std::io::Error::other("disk on fire");
        assert_eq!(get_code(&err), Code::UNKNOWN);
    }

    #[test]
    fn smtp_range_membership() {
        assert!(Code::SMTP_CONNECT.is_smtp());
        assert!(Code::SMTP_END.is_smtp());
        assert!(!Code::INVALID_VALUE.is_smtp());
        assert!(!Code::new(3100).is_smtp());
    }

    #[test]
    fn code_display_includes_name() {
        assert_eq!(Code::ALREADY_EXISTS.to_string(), "1003(already_exists)");
        assert_eq!(Code::new(42).to_string(), "42");
    }
}
