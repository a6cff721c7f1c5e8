//! Scheduler error taxonomy.
//!
//! Every error knows the IPP status it answers with; the dispatcher turns the
//! error into a response and keeps internal detail out of `status-message`
//! for callers that never authenticated.

use thiserror::Error;
use vellum_proto::{Attribute, ProtoError, StatusCode};

pub type Result<T> = std::result::Result<T, SchedError>;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("version {0}.{1} not supported")]
    VersionNotSupported(u8, u8),

    #[error("charset {0:?} not supported")]
    CharsetNotSupported(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NotPossible(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("authentication required")]
    NotAuthenticated,

    #[error("{0}")]
    NotAuthorized(String),

    #[error("encrypted connection required")]
    UpgradeRequired,

    #[error("destination {0:?} is not accepting jobs")]
    NotAcceptingJobs(String),

    #[error("operation not supported (0x{0:04x})")]
    OperationNotSupported(u16),

    #[error("document format {0:?} not supported")]
    FormatNotSupported(String),

    #[error("compression {0:?} not supported")]
    CompressionNotSupported(String),

    #[error("uri scheme {0:?} not supported")]
    UriSchemeNotSupported(String),

    #[error("{reason}")]
    AttributesNotSupported {
        reason: String,
        /// Echoed back in the unsupported group.
        attrs: Vec<Attribute>,
    },

    #[error("{0} exceeds the allowed length")]
    RequestValueTooLong(String),

    #[error("{0}")]
    Conflicting(String),

    #[error("too many subscriptions")]
    TooManySubscriptions,

    #[error("{0}")]
    DeviceError(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl SchedError {
    pub fn status(&self) -> StatusCode {
        use SchedError::*;
        match self {
            BadRequest(_) | Proto(_) => StatusCode::BadRequest,
            VersionNotSupported(..) => StatusCode::VersionNotSupported,
            CharsetNotSupported(_) => StatusCode::CharsetNotSupported,
            NotFound(_) => StatusCode::NotFound,
            NotPossible(_) => StatusCode::NotPossible,
            Forbidden(_) | UpgradeRequired => StatusCode::Forbidden,
            NotAuthenticated => StatusCode::NotAuthenticated,
            NotAuthorized(_) => StatusCode::NotAuthorized,
            NotAcceptingJobs(_) => StatusCode::NotAcceptingJobs,
            OperationNotSupported(_) => StatusCode::OperationNotSupported,
            FormatNotSupported(_) => StatusCode::DocumentFormatNotSupported,
            CompressionNotSupported(_) => StatusCode::CompressionNotSupported,
            UriSchemeNotSupported(_) => StatusCode::UriSchemeNotSupported,
            AttributesNotSupported { .. } => StatusCode::AttributesOrValuesNotSupported,
            RequestValueTooLong(_) => StatusCode::RequestValueTooLong,
            Conflicting(_) => StatusCode::ConflictingAttributes,
            TooManySubscriptions => StatusCode::TooManySubscriptions,
            DeviceError(_) => StatusCode::DeviceError,
            Internal(_) => StatusCode::InternalError,
        }
    }

    /// Attributes to echo in the unsupported group, when any.
    pub fn unsupported_attrs(&self) -> &[Attribute] {
        match self {
            SchedError::AttributesNotSupported { attrs, .. } => attrs,
            _ => &[],
        }
    }

    /// Message safe to show an unauthenticated caller. Engine detail stays in
    /// the log.
    pub fn public_message(&self) -> String {
        match self {
            SchedError::Internal(_) => "internal error".to_string(),
            SchedError::DeviceError(_) => "device error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for SchedError {
    fn from(err: std::io::Error) -> Self {
        SchedError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            SchedError::BadRequest("x".into()).status(),
            StatusCode::BadRequest
        );
        assert_eq!(
            SchedError::TooManySubscriptions.status(),
            StatusCode::TooManySubscriptions
        );
        assert_eq!(
            SchedError::Internal("boom".into()).status(),
            StatusCode::InternalError
        );
    }

    #[test]
    fn internal_detail_is_not_public() {
        let err = SchedError::Internal("/var/spool/vellum/c00001: permission denied".into());
        assert_eq!(err.public_message(), "internal error");
    }
}
