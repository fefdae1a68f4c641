//! Failure classification for external providers (completion, search).

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} rate limited the request")]
    RateLimited {
        provider: &'static str,
        retry_after: Option<Duration>,
    },

    #[error("{provider} server error {status}: {message}")]
    Server {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} network error: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} rejected the request {status}: {message}")]
    Client {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} response could not be parsed: {message}")]
    Parse {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Whether trying again later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout { .. }
                | ProviderError::RateLimited { .. }
                | ProviderError::Server { .. }
                | ProviderError::Network { .. }
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(provider: &'static str, status: StatusCode, body: &str) -> Self {
        let message: String = body.chars().take(500).collect();
        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                provider,
                retry_after: None,
            },
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                ProviderError::Timeout { provider }
            }
            s if s.is_server_error() => ProviderError::Server {
                provider,
                status: s.as_u16(),
                message,
            },
            s => ProviderError::Client {
                provider,
                status: s.as_u16(),
                message,
            },
        }
    }

    /// Classify a transport-level `reqwest` failure.
    pub fn from_reqwest(provider: &'static str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::Timeout { provider }
        } else if error.is_decode() {
            ProviderError::Parse {
                provider,
                message: error.to_string(),
            }
        } else if let Some(status) = error.status() {
            ProviderError::from_status(provider, status, &error.to_string())
        } else {
            ProviderError::Network {
                provider,
                message: error.to_string(),
            }
        }
    }
}

/// Whether any error in the chain is a transient [`ProviderError`].
pub fn is_transient(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ProviderError>())
        .any(ProviderError::is_transient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_status_classification() {
        assert!(ProviderError::from_status("openai", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(ProviderError::from_status("openai", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(ProviderError::from_status("openai", StatusCode::GATEWAY_TIMEOUT, "").is_transient());
        assert!(!ProviderError::from_status("openai", StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!ProviderError::from_status("openai", StatusCode::BAD_REQUEST, "").is_transient());
    }

    #[test]
    fn test_transient_is_found_through_context() {
        let err = Err::<(), _>(ProviderError::Timeout { provider: "tavily" })
            .context("research failed")
            .unwrap_err();
        assert!(is_transient(&err));

        let err = anyhow::anyhow!("plain failure");
        assert!(!is_transient(&err));
    }

    #[test]
    fn test_parse_errors_are_not_transient() {
        let err = anyhow::Error::new(ProviderError::Parse {
            provider: "openai",
            message: "bad json".into(),
        });
        assert!(!is_transient(&err));
    }
}
