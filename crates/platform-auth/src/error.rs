//! Error taxonomy for the credential lifecycle

/// Errors surfaced by the credential lifecycle.
///
/// Transport and filesystem faults are folded into these variants at the
/// crate boundary; callers never see a raw `reqwest` or `io` error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authorization code is missing")]
    MissingCode,

    #[error("no authorization in progress, start the flow again")]
    MissingVerifier,

    #[error("authorization state does not match the pending request")]
    StateMismatch,

    #[error("token endpoint rejected the request: {0}")]
    UpstreamRejected(String),

    #[error("token endpoint returned an incomplete response: {0}")]
    UpstreamMalformed(String),

    #[error("no stored credential, authorization required")]
    NotAuthorized,

    #[error("stored credential is unreadable: {0}")]
    StorageCorrupt(String),

    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl Error {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingCode => "missing_code",
            Error::MissingVerifier => "missing_verifier",
            Error::StateMismatch => "state_mismatch",
            Error::UpstreamRejected(_) => "upstream_rejected",
            Error::UpstreamMalformed(_) => "upstream_malformed",
            Error::NotAuthorized => "not_authorized",
            Error::StorageCorrupt(_) => "storage_corrupt",
            Error::Storage(_) => "storage",
        }
    }

    /// Whether the only recovery is to run the authorization flow again.
    ///
    /// A rejected refresh and a missing credential look the same to callers;
    /// they stay distinct in logs via `kind()`.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Error::MissingCode
                | Error::MissingVerifier
                | Error::StateMismatch
                | Error::UpstreamRejected(_)
                | Error::NotAuthorized
        )
    }
}

/// Result alias for credential lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let errors = [
            Error::MissingCode,
            Error::MissingVerifier,
            Error::StateMismatch,
            Error::UpstreamRejected(String::new()),
            Error::UpstreamMalformed(String::new()),
            Error::NotAuthorized,
            Error::StorageCorrupt(String::new()),
            Error::Storage(String::new()),
        ];
        let mut kinds: Vec<_> = errors.iter().map(Error::kind).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn rejected_refresh_and_missing_credential_both_require_reauthorization() {
        assert!(Error::NotAuthorized.requires_reauthorization());
        assert!(Error::UpstreamRejected("invalid_grant".into()).requires_reauthorization());
        assert!(!Error::UpstreamMalformed("no access_token".into()).requires_reauthorization());
        assert!(!Error::Storage("disk full".into()).requires_reauthorization());
    }

    #[test]
    fn display_carries_upstream_detail() {
        let err = Error::UpstreamRejected("invalid_grant: refresh token revoked".into());
        assert!(err.to_string().contains("refresh token revoked"));
    }
}
