//! Status code registry.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum StatusCode {
    Ok = 0x0000,
    OkIgnoredOrSubstituted = 0x0001,
    OkEventsComplete = 0x0007,
    SeeOther = 0x0280,
    BadRequest = 0x0400,
    Forbidden = 0x0401,
    NotAuthenticated = 0x0402,
    NotAuthorized = 0x0403,
    NotPossible = 0x0404,
    Timeout = 0x0405,
    NotFound = 0x0406,
    Gone = 0x0407,
    RequestEntityTooLarge = 0x0408,
    RequestValueTooLong = 0x0409,
    DocumentFormatNotSupported = 0x040a,
    AttributesOrValuesNotSupported = 0x040b,
    UriSchemeNotSupported = 0x040c,
    CharsetNotSupported = 0x040d,
    ConflictingAttributes = 0x040e,
    CompressionNotSupported = 0x040f,
    DocumentAccessError = 0x0411,
    TooManySubscriptions = 0x0415,
    InternalError = 0x0500,
    OperationNotSupported = 0x0501,
    ServiceUnavailable = 0x0502,
    VersionNotSupported = 0x0503,
    DeviceError = 0x0504,
    TemporaryError = 0x0505,
    NotAcceptingJobs = 0x0506,
    Busy = 0x0507,
    JobCanceled = 0x0508,
    MultipleDocumentJobsNotSupported = 0x0509,
}

impl StatusCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        use StatusCode::*;
        Some(match value {
            0x0000 => Ok,
            0x0001 => OkIgnoredOrSubstituted,
            0x0007 => OkEventsComplete,
            0x0280 => SeeOther,
            0x0400 => BadRequest,
            0x0401 => Forbidden,
            0x0402 => NotAuthenticated,
            0x0403 => NotAuthorized,
            0x0404 => NotPossible,
            0x0405 => Timeout,
            0x0406 => NotFound,
            0x0407 => Gone,
            0x0408 => RequestEntityTooLarge,
            0x0409 => RequestValueTooLong,
            0x040a => DocumentFormatNotSupported,
            0x040b => AttributesOrValuesNotSupported,
            0x040c => UriSchemeNotSupported,
            0x040d => CharsetNotSupported,
            0x040e => ConflictingAttributes,
            0x040f => CompressionNotSupported,
            0x0411 => DocumentAccessError,
            0x0415 => TooManySubscriptions,
            0x0500 => InternalError,
            0x0501 => OperationNotSupported,
            0x0502 => ServiceUnavailable,
            0x0503 => VersionNotSupported,
            0x0504 => DeviceError,
            0x0505 => TemporaryError,
            0x0506 => NotAcceptingJobs,
            0x0507 => Busy,
            0x0508 => JobCanceled,
            0x0509 => MultipleDocumentJobsNotSupported,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_success(self) -> bool {
        self.as_u16() < 0x0100
    }

    /// Canonical keyword used when synthesizing `status-message`.
    pub fn keyword(self) -> &'static str {
        use StatusCode::*;
        match self {
            Ok => "successful-ok",
            OkIgnoredOrSubstituted => "successful-ok-ignored-or-substituted-attributes",
            OkEventsComplete => "successful-ok-events-complete",
            SeeOther => "cups-see-other",
            BadRequest => "client-error-bad-request",
            Forbidden => "client-error-forbidden",
            NotAuthenticated => "client-error-not-authenticated",
            NotAuthorized => "client-error-not-authorized",
            NotPossible => "client-error-not-possible",
            Timeout => "client-error-timeout",
            NotFound => "client-error-not-found",
            Gone => "client-error-gone",
            RequestEntityTooLarge => "client-error-request-entity-too-large",
            RequestValueTooLong => "client-error-request-value-too-long",
            DocumentFormatNotSupported => "client-error-document-format-not-supported",
            AttributesOrValuesNotSupported => "client-error-attributes-or-values-not-supported",
            UriSchemeNotSupported => "client-error-uri-scheme-not-supported",
            CharsetNotSupported => "client-error-charset-not-supported",
            ConflictingAttributes => "client-error-conflicting-attributes",
            CompressionNotSupported => "client-error-compression-not-supported",
            DocumentAccessError => "client-error-document-access-error",
            TooManySubscriptions => "client-error-too-many-subscriptions",
            InternalError => "server-error-internal-error",
            OperationNotSupported => "server-error-operation-not-supported",
            ServiceUnavailable => "server-error-service-unavailable",
            VersionNotSupported => "server-error-version-not-supported",
            DeviceError => "server-error-device-error",
            TemporaryError => "server-error-temporary-error",
            NotAcceptingJobs => "server-error-not-accepting-jobs",
            Busy => "server-error-busy",
            JobCanceled => "server-error-job-canceled",
            MultipleDocumentJobsNotSupported => {
                "server-error-multiple-document-jobs-not-supported"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_keywords() {
        for code in [
            0x0000u16, 0x0001, 0x0007, 0x0280, 0x0400, 0x0401, 0x0402, 0x0403, 0x0404, 0x0405,
            0x0406, 0x0407, 0x0408, 0x0409, 0x040a, 0x040b, 0x040c, 0x040d, 0x040e, 0x040f,
            0x0411, 0x0415, 0x0500, 0x0501, 0x0502, 0x0503, 0x0504, 0x0505, 0x0506, 0x0507,
            0x0508, 0x0509,
        ] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(status.as_u16(), code);
            assert!(!status.keyword().is_empty());
        }
        assert!(StatusCode::from_u16(0x7777).is_none());
    }

    #[test]
    fn success_split() {
        assert!(StatusCode::Ok.is_success());
        assert!(StatusCode::OkEventsComplete.is_success());
        assert!(!StatusCode::BadRequest.is_success());
        assert!(!StatusCode::InternalError.is_success());
    }
}
