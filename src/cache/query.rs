use serde::Serialize;

use crate::error::NodeApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// What a view needs to render one cached resource: whether it is loading,
/// the best data available, and the last error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> QueryState<T> {
    pub fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
        }
    }

    pub fn loading(data: Option<T>) -> Self {
        Self {
            status: QueryStatus::Loading,
            data,
            error: None,
        }
    }

    pub fn success(data: T) -> Self {
        Self {
            status: QueryStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    /// Invalidated, with the previous value still available for display.
    pub fn stale(data: Option<T>) -> Self {
        Self {
            status: QueryStatus::Idle,
            data,
            error: None,
        }
    }

    pub fn error(data: Option<T>, error: &NodeApiError) -> Self {
        Self {
            status: QueryStatus::Error,
            data,
            error: Some(error.to_string()),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}
