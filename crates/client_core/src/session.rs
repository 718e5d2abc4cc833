use shared::domain::RiderId;

/// Authenticated rider identity for one client instance. Owned by the
/// composition root and injected into the gateways; the token is opaque to
/// this crate and attached as a bearer credential on every request.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub rider_id: RiderId,
    pub rider_name: Option<String>,
    bearer_token: Option<String>,
}

impl SessionContext {
    pub fn new(rider_id: RiderId) -> Self {
        Self {
            rider_id,
            rider_name: None,
            bearer_token: None,
        }
    }

    pub fn with_rider_name(mut self, name: impl Into<String>) -> Self {
        self.rider_name = Some(name.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }
}
