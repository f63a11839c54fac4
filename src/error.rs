use thiserror::Error;

/// Failures surfaced by the node API client.
///
/// Variants carry owned strings instead of the underlying transport errors so
/// that a single result can be handed to every caller joined on a shared
/// cache fetch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeApiError {
    #[error("network error{}: {message}", status_suffix(.status))]
    Network { status: Option<u16>, message: String },
    #[error("{details}")]
    Validation { details: String },
    #[error("failed to decode node response: {0}")]
    Decode(String),
    #[error("invalid node url: {0}")]
    InvalidUrl(String),
    #[error("mining already in progress")]
    MiningAlreadyInProgress,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {})", code),
        None => String::new(),
    }
}

impl NodeApiError {
    pub fn validation(details: impl Into<String>) -> Self {
        NodeApiError::Validation {
            details: details.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            NodeApiError::Network { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NodeApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return NodeApiError::Decode(e.to_string());
        }
        NodeApiError::Network {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl From<url::ParseError> for NodeApiError {
    fn from(e: url::ParseError) -> Self {
        NodeApiError::InvalidUrl(e.to_string())
    }
}
