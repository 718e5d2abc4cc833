use serde::{Deserialize, Serialize};

/// Error body shape the backend attaches to non-2xx responses. Depending on
/// the failing layer the detail arrives under `message` or `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiErrorBody {
    pub fn detail(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}
