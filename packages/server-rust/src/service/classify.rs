//! Error classification: maps an `OperationError` to the class of response
//! the boundary should produce.
//!
//! Classification works on codes and code ranges, so a new coded error is
//! classified correctly without touching this module.

use std::fmt;

use reqscope_core::{Code, CodeRange};

use super::operation::OperationError;

/// Caller-facing class of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// The caller sent bad input.
    ClientFault,
    /// The caller could not be authenticated.
    Unauthenticated,
    /// The request was cancelled before it completed.
    Cancelled,
    /// The request's deadline elapsed.
    Timeout,
    /// An external integration (e.g. SMTP) failed.
    UpstreamFault,
    /// Anything else.
    ServerFault,
}

impl Classification {
    /// HTTP-style status code for this class.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::ClientFault => 400,
            Self::Unauthenticated => 401,
            Self::Cancelled => 499,
            Self::Timeout => 504,
            Self::UpstreamFault => 502,
            Self::ServerFault => 500,
        }
    }

    #[must_use]
    pub fn is_client_fault(self) -> bool {
        matches!(self, Self::ClientFault | Self::Unauthenticated)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientFault => "client_fault",
            Self::Unauthenticated => "unauthenticated",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::UpstreamFault => "upstream_fault",
            Self::ServerFault => "server_fault",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a bare code.
#[must_use]
pub fn classify_code(code: Code) -> Classification {
    match code {
        Code::INVALID_VALUE | Code::NOT_FOUND | Code::ALREADY_EXISTS => Classification::ClientFault,
        Code::UNAUTHORIZED => Classification::Unauthenticated,
        Code::CONTEXT_CANCELED => Classification::Cancelled,
        Code::DEADLINE_EXCEEDED => Classification::Timeout,
        code if CodeRange::SMTP.contains(code) => Classification::UpstreamFault,
        _ => Classification::ServerFault,
    }
}

/// Classifies an operation error by its code.
#[must_use]
pub fn classify(err: &OperationError) -> Classification {
    classify_code(err.code())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use reqscope_core::{coded, CodedError, ContextError};

    use super::*;

    #[test]
    fn validation_errors_are_client_faults() {
        let err = OperationError::from(coded!(Code::INVALID_VALUE, "age is invalid"));
        let class = classify(&err);
        assert_eq!(class, Classification::ClientFault);
        assert_eq!(class.status_code(), 400);
        assert!(class.is_client_fault());
    }

    #[test]
    fn context_errors_map_to_cancel_and_timeout() {
        assert_eq!(
            classify(&OperationError::from(ContextError::Cancelled)),
            Classification::Cancelled
        );
        let timeout = classify(&OperationError::from(ContextError::DeadlineExceeded));
        assert_eq!(timeout, Classification::Timeout);
        assert_eq!(timeout.status_code(), 504);
    }

    #[test]
    fn smtp_family_is_upstream() {
        let err = OperationError::from(CodedError::new(Code::SMTP_AUTH, "auth rejected"));
        assert_eq!(classify(&err), Classification::UpstreamFault);
    }

    #[test]
    fn opaque_internal_errors_are_server_faults() {
        let err = OperationError::from(anyhow::anyhow!("unexpected"));
        let class = classify(&err);
        assert_eq!(class, Classification::ServerFault);
        assert!(!class.is_client_fault());
    }

    proptest! {
        #[test]
        fn every_smtp_code_is_upstream(value in 3000u32..=3099) {
            prop_assert_eq!(classify_code(Code::new(value)), Classification::UpstreamFault);
        }

        #[test]
        fn unassigned_codes_are_server_faults(value in 4000u32..100_000) {
            prop_assert_eq!(classify_code(Code::new(value)), Classification::ServerFault);
        }
    }
}
