use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use shared::{
    domain::{GeoPoint, PaymentMethod, RideId},
    error::ApiErrorBody,
    protocol::{FareQuote, PaymentInitiateBody, PaymentRecord, RideBookingRequest, RideRecord},
};

use crate::{error::GatewayError, session::SessionContext};

/// Rider-facing ride endpoints of the backend.
#[async_trait]
pub trait RideGateway: Send + Sync {
    async fn quote_fares(
        &self,
        pickup: GeoPoint,
        drop_off: GeoPoint,
    ) -> Result<FareQuote, GatewayError>;
    async fn book_ride(&self, request: &RideBookingRequest) -> Result<RideRecord, GatewayError>;
    async fn ride_status(&self, ride_id: RideId) -> Result<RideRecord, GatewayError>;
    async fn cancel_ride(&self, ride_id: RideId) -> Result<RideRecord, GatewayError>;
}

/// Payment endpoints of the backend.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(
        &self,
        ride_id: RideId,
        method: PaymentMethod,
    ) -> Result<PaymentRecord, GatewayError>;
    async fn settle(&self, transaction_id: &str) -> Result<PaymentRecord, GatewayError>;
    async fn payment_for_ride(
        &self,
        ride_id: RideId,
    ) -> Result<Option<PaymentRecord>, GatewayError>;
}

pub struct MissingPaymentGateway;

#[async_trait]
impl PaymentGateway for MissingPaymentGateway {
    async fn initiate(
        &self,
        _ride_id: RideId,
        _method: PaymentMethod,
    ) -> Result<PaymentRecord, GatewayError> {
        Err(GatewayError::Unavailable("payment gateway"))
    }

    async fn settle(&self, _transaction_id: &str) -> Result<PaymentRecord, GatewayError> {
        Err(GatewayError::Unavailable("payment gateway"))
    }

    async fn payment_for_ride(
        &self,
        _ride_id: RideId,
    ) -> Result<Option<PaymentRecord>, GatewayError> {
        Err(GatewayError::Unavailable("payment gateway"))
    }
}

/// reqwest-backed implementation of both gateway traits against one backend
/// instance.
pub struct HttpGateway {
    http: Client,
    base_url: String,
    session: SessionContext,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        session: SessionContext,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.session.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, GatewayError> {
        self.authorized(builder).send().await.map_err(send_failure)
    }
}

fn send_failure(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err)
    }
}

/// Decode a 2xx body, or capture the backend's error detail so the caller can
/// classify the rejection.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(GatewayError::from);
    }
    Err(rejection(status, response).await)
}

async fn rejection(status: StatusCode, response: Response) -> GatewayError {
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .ok()
        .and_then(|parsed| parsed.detail().map(str::to_string))
        .unwrap_or(body);
    GatewayError::Rejected {
        status: status.as_u16(),
        message,
    }
}

/// The backend signals driver scarcity only through this message text; keep
/// the match in one place so a structured error code can replace it.
pub fn is_no_drivers_error(message: &str) -> bool {
    message.to_ascii_lowercase().contains("no drivers available")
}

#[async_trait]
impl RideGateway for HttpGateway {
    async fn quote_fares(
        &self,
        pickup: GeoPoint,
        drop_off: GeoPoint,
    ) -> Result<FareQuote, GatewayError> {
        debug!("fare: requesting quote");
        let response = self
            .send(
                self.http
                    .get(format!("{}/api/rides/calculate", self.base_url))
                    .query(&[
                        ("pLat", pickup.latitude),
                        ("pLon", pickup.longitude),
                        ("dLat", drop_off.latitude),
                        ("dLon", drop_off.longitude),
                    ]),
            )
            .await?;
        decode(response).await
    }

    async fn book_ride(&self, request: &RideBookingRequest) -> Result<RideRecord, GatewayError> {
        let response = self
            .send(
                self.http
                    .post(format!("{}/api/rides/request", self.base_url))
                    .json(request),
            )
            .await?;
        decode(response).await
    }

    async fn ride_status(&self, ride_id: RideId) -> Result<RideRecord, GatewayError> {
        let response = self
            .send(
                self.http
                    .get(format!("{}/api/rides/{}", self.base_url, ride_id.0)),
            )
            .await?;
        decode(response).await
    }

    async fn cancel_ride(&self, ride_id: RideId) -> Result<RideRecord, GatewayError> {
        let response = self
            .send(
                self.http
                    .post(format!("{}/api/rides/{}/cancel", self.base_url, ride_id.0)),
            )
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn initiate(
        &self,
        ride_id: RideId,
        method: PaymentMethod,
    ) -> Result<PaymentRecord, GatewayError> {
        let response = self
            .send(
                self.http
                    .post(format!(
                        "{}/api/payments/rides/{}/initiate",
                        self.base_url, ride_id.0
                    ))
                    .json(&PaymentInitiateBody {
                        payment_method: method,
                    }),
            )
            .await?;
        decode(response).await
    }

    async fn settle(&self, transaction_id: &str) -> Result<PaymentRecord, GatewayError> {
        let response = self
            .send(self.http.post(format!(
                "{}/api/payments/{}/complete",
                self.base_url, transaction_id
            )))
            .await?;
        decode(response).await
    }

    async fn payment_for_ride(
        &self,
        ride_id: RideId,
    ) -> Result<Option<PaymentRecord>, GatewayError> {
        let response = self
            .send(self.http.get(format!(
                "{}/api/payments/rides/{}",
                self.base_url, ride_id.0
            )))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_no_drivers_message_variants() {
        assert!(is_no_drivers_error("No Drivers Available nearby!"));
        assert!(is_no_drivers_error("no drivers available"));
        assert!(!is_no_drivers_error("Ride already processed"));
        assert!(!is_no_drivers_error("driver is offline"));
    }
}
