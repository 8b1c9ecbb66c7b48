//! HTTP failure classification shared by both adapters.

use agent_core::AgentError;
use reqwest::StatusCode;

const MAX_BODY_IN_ERROR: usize = 300;

/// Transport-level failure talking to a model backend
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{backend} unreachable: {source}")]
    Unreachable {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} returned HTTP {status}: {body}")]
    Status {
        backend: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{backend} sent an invalid response: {detail}")]
    Malformed { backend: &'static str, detail: String },
}

impl TransportError {
    pub fn malformed(backend: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            backend,
            detail: detail.into(),
        }
    }

    /// Build a status error, reading (and truncating) the response body
    pub async fn from_response(backend: &'static str, response: reqwest::Response) -> Self {
        let status = response.status();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_BODY_IN_ERROR {
            let mut cut = MAX_BODY_IN_ERROR;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("...");
        }
        Self::Status { backend, status, body }
    }

    pub fn from_reqwest(backend: &'static str, source: reqwest::Error) -> Self {
        if source.is_decode() {
            Self::malformed(backend, source.to_string())
        } else {
            Self::Unreachable { backend, source }
        }
    }
}

impl From<TransportError> for AgentError {
    fn from(err: TransportError) -> Self {
        let message = err.to_string();
        match err {
            TransportError::Unreachable { .. } => AgentError::BackendUnavailable(message),
            TransportError::Status { status, .. } if status == StatusCode::TOO_MANY_REQUESTS => {
                AgentError::BackendRateLimited(message)
            }
            TransportError::Status { status, .. }
                if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT =>
            {
                AgentError::BackendUnavailable(message)
            }
            TransportError::Status { .. } | TransportError::Malformed { .. } => {
                AgentError::BackendProtocol(message)
            }
        }
    }
}
