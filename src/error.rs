//! Provider error representation and classification
//!
//! The provisioning API reports failures three ways: an HTTP rejection of
//! the mutating call itself, a transport failure that never produced a
//! response, and a terminal error payload embedded in a `DONE` operation.
//! [`classify`] folds all of them into the small set of semantic classes the
//! mutation guard branches on. Classification is total: any error the
//! provider can produce maps to exactly one class, with `Permanent` as the
//! fallback for everything unrecognized.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::operation::OperationError;

/// Reason tokens the provider attaches to duplicate-create rejections.
const DUPLICATE_REASONS: [&str; 2] = ["alreadyExists", "duplicate"];

/// Reason tokens that mark a 403 as throttling rather than denial.
const RATE_LIMIT_REASONS: [&str; 3] = [
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
];

/// Raw error surfaced by the provider layer.
///
/// Carries the structure [`classify`] keys on, so classification works from
/// data wherever the provider gives us data instead of prose.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApiError {
    /// The provider rejected the request with an HTTP error response.
    #[error(
        "api error {code} [{reason_text}]: {message}",
        reason_text = .reason.as_deref().unwrap_or("unknown")
    )]
    Http {
        /// HTTP status code of the response.
        code: u16,
        /// Provider reason token from the error envelope, when present.
        reason: Option<String>,
        /// Human-readable description.
        message: String,
    },

    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),

    /// A terminal error payload reported by a completed operation.
    #[error("operation error {code}: {message}")]
    Operation {
        /// Provider error code, e.g. `RESOURCE_NOT_FOUND`.
        code: String,
        /// Joined messages of the payload entries.
        message: String,
    },
}

impl ApiError {
    /// HTTP error without a reason token.
    pub fn http(code: u16, message: impl Into<String>) -> Self {
        Self::Http {
            code,
            reason: None,
            message: message.into(),
        }
    }

    /// HTTP error with the provider's reason token.
    pub fn http_with_reason(
        code: u16,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Http {
            code,
            reason: Some(reason.into()),
            message: message.into(),
        }
    }

    /// Transport-level failure (connection refused, timeout, closed mid-body).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Fold a terminal error payload into a single error.
    ///
    /// The first entry's code stands for the whole payload; messages are
    /// joined so nothing is dropped from logs.
    pub fn from_operation_errors(errors: &[OperationError]) -> Self {
        let code = errors
            .first()
            .map(|e| e.code.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let message = if errors.is_empty() {
            "operation failed without error detail".to_string()
        } else {
            errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        };
        Self::Operation { code, message }
    }

    /// Parse a provider error response body into a structured error.
    ///
    /// The provider wraps errors in a JSON envelope
    /// (`{"error": {"message": ..., "errors": [{"reason": ...}]}}`); when the
    /// body is not that envelope the raw text becomes the message so nothing
    /// is lost.
    pub fn from_response_body(code: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: Option<Body>,
        }
        #[derive(Deserialize)]
        struct Body {
            #[serde(default)]
            message: String,
            #[serde(default)]
            errors: Vec<Item>,
        }
        #[derive(Deserialize)]
        struct Item {
            #[serde(default)]
            reason: Option<String>,
            #[serde(default)]
            message: Option<String>,
        }

        let parsed: Option<Body> = serde_json::from_str::<Envelope>(body)
            .ok()
            .and_then(|envelope| envelope.error);

        match parsed {
            Some(body_detail) => {
                let reason = body_detail.errors.iter().find_map(|i| i.reason.clone());
                let message = if !body_detail.message.is_empty() {
                    body_detail.message
                } else {
                    body_detail
                        .errors
                        .into_iter()
                        .find_map(|i| i.message)
                        .unwrap_or_else(|| body.trim().to_string())
                };
                Self::Http {
                    code,
                    reason,
                    message,
                }
            }
            None => Self::http(code, body.trim()),
        }
    }
}

/// Why a failure is considered transient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransientCause {
    /// The provider throttled the request (429, or 403 with a rate-limit
    /// reason token).
    RateLimited,
    /// The provider reported a server-side fault (5xx).
    BackendError,
    /// The request never reached the provider or the response was lost.
    Transport,
    /// The wait was cancelled or timed out before observing a terminal
    /// status; the operation may still complete on the provider side.
    Cancelled,
}

impl fmt::Display for TransientCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransientCause::RateLimited => "rate limited",
            TransientCause::BackendError => "backend error",
            TransientCause::Transport => "transport",
            TransientCause::Cancelled => "cancelled",
        };
        write!(f, "{text}")
    }
}

/// Semantic classification of a raw provider error.
///
/// The guard branches on these classes instead of inspecting raw errors, so
/// the mapping from provider idiosyncrasies to reconciliation behavior lives
/// in exactly one place. The set is closed on purpose: callers are expected
/// to match it exhaustively.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorClass {
    /// The target resource does not exist.
    NotFound,
    /// A resource with the requested identity already exists.
    AlreadyExists,
    /// The request contradicts concurrent state (non-duplicate 409, 412).
    Conflict,
    /// Safe to retry the mutation without re-evaluating desired state.
    Transient(TransientCause),
    /// Everything else; carries the raw error for diagnostics.
    Permanent(ApiError),
}

impl ErrorClass {
    /// Whether a caller may re-issue the mutation as-is and expect a
    /// different answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient(_))
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::NotFound => write!(f, "not found"),
            ErrorClass::AlreadyExists => write!(f, "already exists"),
            ErrorClass::Conflict => write!(f, "conflict"),
            ErrorClass::Transient(cause) => write!(f, "transient ({cause})"),
            ErrorClass::Permanent(err) => write!(f, "permanent: {err}"),
        }
    }
}

/// Classify a raw provider error into its semantic class.
///
/// Total over all inputs; unrecognized errors land in `Permanent` rather
/// than guessing at retryability.
pub fn classify(err: &ApiError) -> ErrorClass {
    match err {
        ApiError::Http {
            code,
            reason,
            message,
        } => classify_http(*code, reason.as_deref(), message, err),
        ApiError::Transport(_) => ErrorClass::Transient(TransientCause::Transport),
        _ => ErrorClass::Permanent(err.clone()),
    }
}

fn classify_http(code: u16, reason: Option<&str>, message: &str, raw: &ApiError) -> ErrorClass {
    match code {
        404 => ErrorClass::NotFound,
        409 if has_duplicate_semantics(reason, message) => ErrorClass::AlreadyExists,
        409 | 412 => ErrorClass::Conflict,
        429 => ErrorClass::Transient(TransientCause::RateLimited),
        403 if matches_reason(reason, &RATE_LIMIT_REASONS) => {
            ErrorClass::Transient(TransientCause::RateLimited)
        }
        500..=599 => ErrorClass::Transient(TransientCause::BackendError),
        _ => ErrorClass::Permanent(raw.clone()),
    }
}

/// Whether a 409 means "the thing you are creating is already there".
///
/// The provider tags duplicate creates with a reason token; when the token
/// is missing the message text is the only signal left.
fn has_duplicate_semantics(reason: Option<&str>, message: &str) -> bool {
    if reason.is_some() {
        return matches_reason(reason, &DUPLICATE_REASONS);
    }
    message.to_ascii_lowercase().contains("already exists")
}

fn matches_reason(reason: Option<&str>, tokens: &[&str]) -> bool {
    reason.is_some_and(|r| tokens.iter().any(|t| r.eq_ignore_ascii_case(t)))
}
