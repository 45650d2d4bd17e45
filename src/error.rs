//! Error taxonomies for the two network boundaries.
//!
//! Fetch-side and write-side failures are kept as separate types because they
//! flow into different policies: source errors abort a single source's unit
//! for the round, sink errors abort a single delivery and only the
//! unreachable kind is retried.

/// A failed status query against a sync daemon.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("source unreachable: {0}")]
    Unreachable(String),
    #[error("source rejected credentials: {0}")]
    AuthFailed(String),
    #[error("unexpected source response: {0}")]
    Protocol(String),
}

impl SourceError {
    /// Stable kind label for structured log events.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Unreachable(_) => "unreachable",
            SourceError::AuthFailed(_) => "auth_failed",
            SourceError::Protocol(_) => "protocol",
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            SourceError::Unreachable(err.to_string())
        } else {
            SourceError::Protocol(err.to_string())
        }
    }

    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                SourceError::AuthFailed(format!("{status}: {body}"))
            }
            _ => SourceError::Protocol(format!("{status}: {body}")),
        }
    }
}

/// A failed batch delivery to a time-series database.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("sink unreachable: {0}")]
    Unreachable(String),
    #[error("sink rejected credentials: {0}")]
    AuthFailed(String),
    #[error("sink rejected batch: {0}")]
    Rejected(String),
}

impl SinkError {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::Unreachable(_) => "unreachable",
            SinkError::AuthFailed(_) => "auth_failed",
            SinkError::Rejected(_) => "rejected",
        }
    }

    /// Only transient network conditions are worth another attempt. Auth and
    /// schema rejections will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Unreachable(_))
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            SinkError::Unreachable(err.to_string())
        } else {
            SinkError::Rejected(err.to_string())
        }
    }

    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                SinkError::AuthFailed(format!("{status}: {body}"))
            }
            // Gateway-style failures usually mean the database is briefly
            // gone, not that the batch is bad.
            reqwest::StatusCode::BAD_GATEWAY
            | reqwest::StatusCode::SERVICE_UNAVAILABLE
            | reqwest::StatusCode::GATEWAY_TIMEOUT => {
                SinkError::Unreachable(format!("{status}: {body}"))
            }
            _ => SinkError::Rejected(format!("{status}: {body}")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sink_retryability_follows_kind() {
        assert!(SinkError::Unreachable("connection refused".into()).is_retryable());
        assert!(!SinkError::AuthFailed("bad token".into()).is_retryable());
        assert!(!SinkError::Rejected("unparseable line".into()).is_retryable());
    }

    #[test]
    fn sink_status_classification() {
        use reqwest::StatusCode;
        let err = SinkError::from_status(StatusCode::SERVICE_UNAVAILABLE, "down".into());
        assert!(matches!(err, SinkError::Unreachable(_)));
        let err = SinkError::from_status(StatusCode::UNAUTHORIZED, "".into());
        assert!(matches!(err, SinkError::AuthFailed(_)));
        let err = SinkError::from_status(StatusCode::BAD_REQUEST, "bad line".into());
        assert!(matches!(err, SinkError::Rejected(_)));
    }

    #[test]
    fn source_status_classification() {
        use reqwest::StatusCode;
        let err = SourceError::from_status(StatusCode::FORBIDDEN, "".into());
        assert!(matches!(err, SourceError::AuthFailed(_)));
        let err = SourceError::from_status(StatusCode::NOT_FOUND, "".into());
        assert!(matches!(err, SourceError::Protocol(_)));
    }
}
