use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared::{
    domain::{GeoPoint, PaymentMethod, RideId, RideStatus, VehicleClass},
    protocol::{FareQuote, PaymentRecord, RideBookingRequest, RideRecord},
};

pub mod config;
pub mod error;
pub mod gateway;
mod poll;
pub mod session;
pub mod transport;

pub use error::{GatewayError, RideError};
pub use session::SessionContext;

use gateway::{is_no_drivers_error, PaymentGateway, RideGateway};
use transport::{PushChannel, PushSubscription};

/// Rider-side view of where the active ride stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RidePhase {
    Idle,
    SelectingVehicle,
    ConfirmingVehicle,
    AwaitingDriver,
    DriverAssigned,
    InProgress,
    Completed,
    Cancelled,
}

const STARTED_RANK: u8 = 2;

impl RidePhase {
    /// Rank on the forward-only booking progression; `None` for phases
    /// without a booked ride.
    fn progress_rank(self) -> Option<u8> {
        match self {
            RidePhase::AwaitingDriver => Some(0),
            RidePhase::DriverAssigned => Some(1),
            RidePhase::InProgress => Some(2),
            RidePhase::Completed => Some(3),
            _ => None,
        }
    }
}

fn phase_for_rank(rank: u8) -> RidePhase {
    match rank {
        0 => RidePhase::AwaitingDriver,
        1 => RidePhase::DriverAssigned,
        2 => RidePhase::InProgress,
        _ => RidePhase::Completed,
    }
}

/// Search input as resolved by the presentation layer: coordinates are
/// `None` until a suggestion has been picked for that side.
#[derive(Debug, Clone, Default)]
pub struct TripDraft {
    pub pickup: Option<GeoPoint>,
    pub drop_off: Option<GeoPoint>,
    pub pickup_area: Option<String>,
    pub drop_area: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSelection {
    pub class: VehicleClass,
    pub fare: f64,
    pub arrival_label: String,
}

/// Rough door-to-door estimate from quoted distance and urban average speeds.
fn arrival_label(class: VehicleClass, distance_km: f64) -> String {
    let speed_kmh = match class {
        VehicleClass::Bike => 28.0,
        VehicleClass::Auto => 22.0,
        VehicleClass::Car | VehicleClass::Premier => 25.0,
    };
    let minutes = ((distance_km / speed_kmh) * 60.0).ceil().max(1.0) as u32;
    format!("{minutes} min")
}

/// Events for the presentation layer.
#[derive(Debug, Clone)]
pub enum RideEvent {
    PhaseChanged { from: RidePhase, to: RidePhase },
    QuoteReady(FareQuote),
    BookingConfirmed(RideRecord),
    RideUpdated(RideRecord),
    PaymentUpdated(PaymentRecord),
    Error(String),
}

/// What `apply_remote_update` did with an inbound snapshot. Ignoring an
/// update is normal operation, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied(RidePhase),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoActiveRide,
    RideMismatch,
    UnknownStatus,
    Stale,
}

/// Owned view of the controller state for rendering.
#[derive(Debug, Clone)]
pub struct RideSnapshot {
    pub phase: RidePhase,
    pub quote: Option<FareQuote>,
    pub selection: Option<VehicleSelection>,
    pub ride: Option<RideRecord>,
    pub otp: Option<String>,
    pub payment: Option<PaymentRecord>,
}

/// Push pump and status poller scoped to one booked ride. Dropping this
/// aborts both tasks; aborting the push pump drops its subscription, which
/// sends the unsubscribe frame.
struct ActiveRideChannels {
    push_pump: Option<JoinHandle<()>>,
    poller: JoinHandle<()>,
}

impl Drop for ActiveRideChannels {
    fn drop(&mut self) {
        if let Some(task) = self.push_pump.take() {
            task.abort();
        }
        self.poller.abort();
    }
}

struct LifecycleState {
    phase: RidePhase,
    pickup: Option<GeoPoint>,
    drop_off: Option<GeoPoint>,
    pickup_area: Option<String>,
    drop_area: Option<String>,
    quote: Option<FareQuote>,
    selection: Option<VehicleSelection>,
    ride: Option<RideRecord>,
    otp: Option<String>,
    payment: Option<PaymentRecord>,
    request_in_flight: bool,
    channels: Option<ActiveRideChannels>,
}

impl LifecycleState {
    fn new() -> Self {
        Self {
            phase: RidePhase::Idle,
            pickup: None,
            drop_off: None,
            pickup_area: None,
            drop_area: None,
            quote: None,
            selection: None,
            ride: None,
            otp: None,
            payment: None,
            request_in_flight: false,
            channels: None,
        }
    }
}

/// Holds and transitions the rider-side view of a ride, driven by user
/// actions and by remote snapshots arriving over push or poll. Both inbound
/// paths converge on [`RideLifecycleController::apply_remote_update`], which
/// is idempotent and only ever moves the ride forward.
pub struct RideLifecycleController {
    session: SessionContext,
    rides: Arc<dyn RideGateway>,
    payments: Arc<dyn PaymentGateway>,
    push: Arc<dyn PushChannel>,
    poll_interval: Duration,
    inner: Mutex<LifecycleState>,
    events: broadcast::Sender<RideEvent>,
}

impl RideLifecycleController {
    pub fn new(
        session: SessionContext,
        rides: Arc<dyn RideGateway>,
        payments: Arc<dyn PaymentGateway>,
        push: Arc<dyn PushChannel>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            session,
            rides,
            payments,
            push,
            poll_interval,
            inner: Mutex::new(LifecycleState::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RideEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> RidePhase {
        self.inner.lock().await.phase
    }

    pub async fn snapshot(&self) -> RideSnapshot {
        let state = self.inner.lock().await;
        RideSnapshot {
            phase: state.phase,
            quote: state.quote.clone(),
            selection: state.selection.clone(),
            ride: state.ride.clone(),
            otp: state.otp.clone(),
            payment: state.payment.clone(),
        }
    }

    fn transition(&self, state: &mut LifecycleState, to: RidePhase) {
        if state.phase == to {
            return;
        }
        let from = state.phase;
        state.phase = to;
        debug!(?from, ?to, "ride: phase transition");
        let _ = self.events.send(RideEvent::PhaseChanged { from, to });
    }

    /// Discard all ride state and return to `Idle`. Channel handles are
    /// dropped here, which unsubscribes the push topic and stops the poller.
    fn reset_to_idle(&self, state: &mut LifecycleState) {
        state.channels = None;
        state.ride = None;
        state.otp = None;
        state.payment = None;
        state.quote = None;
        state.selection = None;
        state.pickup = None;
        state.drop_off = None;
        state.pickup_area = None;
        state.drop_area = None;
        self.transition(state, RidePhase::Idle);
    }

    /// Fetch per-class fares for a resolved pickup/drop pair. On success the
    /// controller moves to `SelectingVehicle` with the quote stored.
    pub async fn request_quote(&self, draft: TripDraft) -> Result<FareQuote, RideError> {
        let (pickup, drop_off) = {
            let mut state = self.inner.lock().await;
            if state.phase != RidePhase::Idle {
                return Err(RideError::OutOfPhase {
                    action: "request_quote",
                    phase: state.phase,
                });
            }
            if state.request_in_flight {
                return Err(RideError::RequestInFlight);
            }
            let (pickup, drop_off) = match (draft.pickup, draft.drop_off) {
                (Some(pickup), Some(drop_off)) => (pickup, drop_off),
                _ => {
                    return Err(RideError::Validation(
                        "pickup and drop coordinates are required".into(),
                    ))
                }
            };
            if !pickup.is_valid() || !drop_off.is_valid() {
                return Err(RideError::Validation(
                    "pickup or drop coordinates are out of range".into(),
                ));
            }
            state.request_in_flight = true;
            (pickup, drop_off)
        };

        let result = self.rides.quote_fares(pickup, drop_off).await;

        let mut state = self.inner.lock().await;
        state.request_in_flight = false;
        match result {
            Ok(quote) => {
                info!(distance_km = quote.distance_km, "fare: quote received");
                state.pickup = Some(pickup);
                state.drop_off = Some(drop_off);
                state.pickup_area = draft.pickup_area;
                state.drop_area = draft.drop_area;
                state.quote = Some(quote.clone());
                self.transition(&mut state, RidePhase::SelectingVehicle);
                let _ = self.events.send(RideEvent::QuoteReady(quote.clone()));
                Ok(quote)
            }
            Err(GatewayError::Timeout) => Err(RideError::RequestTimeout),
            Err(err) => Err(RideError::QuoteUnavailable(err.to_string())),
        }
    }

    /// Pick a vehicle class from the stored quote. Purely local.
    pub async fn select_vehicle(
        &self,
        class: VehicleClass,
    ) -> Result<VehicleSelection, RideError> {
        let mut state = self.inner.lock().await;
        if !matches!(
            state.phase,
            RidePhase::SelectingVehicle | RidePhase::ConfirmingVehicle
        ) {
            return Err(RideError::OutOfPhase {
                action: "select_vehicle",
                phase: state.phase,
            });
        }
        let quote = state
            .quote
            .as_ref()
            .ok_or_else(|| RideError::Validation("no fare quote available".into()))?;
        let selection = VehicleSelection {
            class,
            fare: quote.price_for(class),
            arrival_label: arrival_label(class, quote.distance_km),
        };
        debug!(class = class.as_str(), fare = selection.fare, "ride: vehicle selected");
        state.selection = Some(selection.clone());
        self.transition(&mut state, RidePhase::ConfirmingVehicle);
        Ok(selection)
    }

    /// Book the selected vehicle. On success the controller moves to
    /// `AwaitingDriver`, stores the ride and its OTP, subscribes to the
    /// ride's push topic and starts the fallback poller. A booking rejection
    /// returns to `SelectingVehicle` with the quote untouched.
    pub async fn confirm_booking(self: &Arc<Self>) -> Result<RideRecord, RideError> {
        let request = {
            let mut state = self.inner.lock().await;
            if state.phase != RidePhase::ConfirmingVehicle {
                return Err(RideError::OutOfPhase {
                    action: "confirm_booking",
                    phase: state.phase,
                });
            }
            if state.request_in_flight {
                return Err(RideError::RequestInFlight);
            }
            let selection = state
                .selection
                .clone()
                .ok_or_else(|| RideError::Validation("no vehicle selected".into()))?;
            let (pickup, drop_off) = match (state.pickup, state.drop_off) {
                (Some(pickup), Some(drop_off)) => (pickup, drop_off),
                _ => {
                    return Err(RideError::Validation(
                        "pickup and drop coordinates are required".into(),
                    ))
                }
            };
            state.request_in_flight = true;
            let mut request =
                RideBookingRequest::new(self.session.rider_id, pickup, drop_off, selection.class);
            request.pickup_area = state.pickup_area.clone();
            request.drop_area = state.drop_area.clone();
            request
        };

        let booking_ref = Uuid::new_v4();
        info!(%booking_ref, class = request.vehicle_type.as_str(), "ride: booking requested");
        let result = self.rides.book_ride(&request).await;

        let ride = {
            let mut state = self.inner.lock().await;
            state.request_in_flight = false;
            match result {
                Ok(ride) => {
                    if state.phase != RidePhase::ConfirmingVehicle {
                        info!(
                            %booking_ref,
                            ride_id = ride.id.0,
                            "ride: booking landed after local cancel; revoking"
                        );
                        drop(state);
                        self.spawn_cancel_request(ride.id);
                        return Err(RideError::BookingFailed(
                            "booking superseded by local cancellation".into(),
                        ));
                    }
                    state.otp = ride.otp.clone();
                    state.ride = Some(ride.clone());
                    self.transition(&mut state, RidePhase::AwaitingDriver);
                    ride
                }
                Err(err) => {
                    // the user keeps their quote and retries from selection
                    state.selection = None;
                    self.transition(&mut state, RidePhase::SelectingVehicle);
                    return Err(match err {
                        GatewayError::Timeout => RideError::RequestTimeout,
                        GatewayError::Rejected { ref message, .. }
                            if is_no_drivers_error(message) =>
                        {
                            RideError::NoDriversAvailable
                        }
                        other => RideError::BookingFailed(other.to_string()),
                    });
                }
            }
        };

        let channels = self.open_ride_channels(ride.id).await;
        {
            let mut state = self.inner.lock().await;
            if state.phase == RidePhase::AwaitingDriver
                && state.ride.as_ref().map(|r| r.id) == Some(ride.id)
            {
                state.channels = Some(channels);
            }
        }

        info!(
            %booking_ref,
            ride_id = ride.id.0,
            otp_issued = ride.otp.is_some(),
            "ride: booking confirmed; awaiting driver"
        );
        let _ = self.events.send(RideEvent::BookingConfirmed(ride.clone()));
        Ok(ride)
    }

    async fn open_ride_channels(self: &Arc<Self>, ride_id: RideId) -> ActiveRideChannels {
        let push_pump = match self.push.subscribe(ride_id).await {
            Ok(subscription) => Some(self.spawn_push_pump(ride_id, subscription)),
            Err(err) => {
                warn!(ride_id = ride_id.0, "push: subscribe failed, polling only: {err}");
                None
            }
        };
        let poller = poll::spawn_status_poller(
            Arc::clone(self),
            Arc::clone(&self.rides),
            ride_id,
            self.poll_interval,
        );
        ActiveRideChannels { push_pump, poller }
    }

    fn spawn_push_pump(
        self: &Arc<Self>,
        ride_id: RideId,
        mut subscription: PushSubscription,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(record) = subscription.next_update().await {
                let _ = controller.apply_remote_update(record).await;
            }
            debug!(ride_id = ride_id.0, "push: subscription stream ended");
        })
    }

    /// Single entry point for inbound ride snapshots, from push and poll
    /// alike. Duplicate, stale, unknown-status, and wrong-ride updates are
    /// ignored; everything else advances the phase, applying the side
    /// effects of any skipped steps along the way.
    pub async fn apply_remote_update(self: &Arc<Self>, update: RideRecord) -> UpdateOutcome {
        let mut state = self.inner.lock().await;
        let Some(active_id) = state.ride.as_ref().map(|r| r.id) else {
            debug!(ride_id = update.id.0, "ride: update ignored, no active ride");
            return UpdateOutcome::Ignored(IgnoreReason::NoActiveRide);
        };
        if active_id != update.id {
            debug!(
                ride_id = update.id.0,
                active_ride_id = active_id.0,
                "ride: update for another ride ignored"
            );
            return UpdateOutcome::Ignored(IgnoreReason::RideMismatch);
        }

        if update.status == RideStatus::Cancelled {
            if state.phase == RidePhase::Completed {
                debug!(ride_id = update.id.0, "ride: cancellation after completion ignored");
                return UpdateOutcome::Ignored(IgnoreReason::Stale);
            }
            info!(ride_id = update.id.0, "ride: cancelled by backend");
            self.transition(&mut state, RidePhase::Cancelled);
            self.reset_to_idle(&mut state);
            return UpdateOutcome::Applied(RidePhase::Idle);
        }

        let Some(update_rank) = update.status.progress() else {
            warn!(
                ride_id = update.id.0,
                status = ?update.status,
                "ride: unknown status ignored"
            );
            return UpdateOutcome::Ignored(IgnoreReason::UnknownStatus);
        };
        let Some(current_rank) = state.phase.progress_rank() else {
            debug!(
                ride_id = update.id.0,
                phase = ?state.phase,
                "ride: update ignored outside active ride phases"
            );
            return UpdateOutcome::Ignored(IgnoreReason::Stale);
        };
        if update_rank <= current_rank {
            debug!(
                ride_id = update.id.0,
                status = ?update.status,
                "ride: duplicate or stale update ignored"
            );
            return UpdateOutcome::Ignored(IgnoreReason::Stale);
        }

        if let Some(ride) = state.ride.as_mut() {
            ride.absorb(update);
        }
        if update_rank >= STARTED_RANK {
            // OTP only authorizes the trip start; nothing may display it after
            state.otp = None;
            if let Some(ride) = state.ride.as_mut() {
                ride.otp = None;
            }
        }
        let target = phase_for_rank(update_rank);
        self.transition(&mut state, target);
        if let Some(ride) = state.ride.clone() {
            let _ = self.events.send(RideEvent::RideUpdated(ride));
        }

        if target == RidePhase::Completed {
            state.channels = None;
            self.spawn_payment_fetch(active_id);
        }
        UpdateOutcome::Applied(target)
    }

    fn spawn_payment_fetch(self: &Arc<Self>, ride_id: RideId) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            match controller.payments.payment_for_ride(ride_id).await {
                Ok(Some(payment)) => {
                    let mut state = controller.inner.lock().await;
                    if state.ride.as_ref().map(|r| r.id) == Some(ride_id) {
                        state.payment = Some(payment.clone());
                        let _ = controller.events.send(RideEvent::PaymentUpdated(payment));
                    }
                }
                Ok(None) => {
                    debug!(ride_id = ride_id.0, "payment: no record yet for completed ride");
                }
                Err(err) => {
                    let _ = controller.events.send(RideEvent::Error(format!(
                        "failed to fetch payment for ride {}: {err}",
                        ride_id.0
                    )));
                }
            }
        });
    }

    /// Abandon the current search or ride. The local reset to `Idle` is
    /// unconditional; the cancellation request is fire-and-forget so the
    /// rider is never stuck unable to start a new search.
    pub async fn cancel(self: &Arc<Self>) {
        let booked = {
            let mut state = self.inner.lock().await;
            if state.phase == RidePhase::Idle {
                return;
            }
            let booked = state.ride.as_ref().map(|r| r.id);
            info!(ride_id = ?booked.map(|id| id.0), "ride: cancelled locally");
            self.reset_to_idle(&mut state);
            booked
        };
        if let Some(ride_id) = booked {
            self.spawn_cancel_request(ride_id);
        }
    }

    fn spawn_cancel_request(self: &Arc<Self>, ride_id: RideId) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            match controller.rides.cancel_ride(ride_id).await {
                Ok(_) => info!(ride_id = ride_id.0, "ride: cancellation acknowledged by backend"),
                Err(err) => {
                    warn!(ride_id = ride_id.0, "ride: cancellation request failed: {err}");
                    let _ = controller.events.send(RideEvent::Error(format!(
                        "cancellation for ride {} may not have reached the server: {err}",
                        ride_id.0
                    )));
                }
            }
        });
    }

    /// Start settling the completed ride with the given method.
    pub async fn initiate_payment(
        &self,
        method: PaymentMethod,
    ) -> Result<PaymentRecord, RideError> {
        let ride_id = {
            let state = self.inner.lock().await;
            if state.phase != RidePhase::Completed {
                return Err(RideError::OutOfPhase {
                    action: "initiate_payment",
                    phase: state.phase,
                });
            }
            match state.ride.as_ref().map(|r| r.id) {
                Some(id) => id,
                None => return Err(RideError::Validation("no completed ride on record".into())),
            }
        };

        match self.payments.initiate(ride_id, method).await {
            Ok(payment) => {
                let mut state = self.inner.lock().await;
                if state.ride.as_ref().map(|r| r.id) == Some(ride_id) {
                    state.payment = Some(payment.clone());
                    let _ = self.events.send(RideEvent::PaymentUpdated(payment.clone()));
                }
                info!(
                    ride_id = ride_id.0,
                    transaction_id = %payment.transaction_id,
                    "payment: initiated"
                );
                Ok(payment)
            }
            Err(GatewayError::Timeout) => Err(RideError::RequestTimeout),
            Err(err) => Err(RideError::PaymentFailed(err.to_string())),
        }
    }

    /// Mark the initiated payment as completed.
    pub async fn settle_payment(&self) -> Result<PaymentRecord, RideError> {
        let transaction_id = {
            let state = self.inner.lock().await;
            if state.phase != RidePhase::Completed {
                return Err(RideError::OutOfPhase {
                    action: "settle_payment",
                    phase: state.phase,
                });
            }
            match state.payment.as_ref() {
                Some(payment) => payment.transaction_id.clone(),
                None => {
                    return Err(RideError::Validation(
                        "no initiated payment to settle".into(),
                    ))
                }
            }
        };

        match self.payments.settle(&transaction_id).await {
            Ok(payment) => {
                let mut state = self.inner.lock().await;
                state.payment = Some(payment.clone());
                let _ = self.events.send(RideEvent::PaymentUpdated(payment.clone()));
                info!(transaction_id = %payment.transaction_id, "payment: settled");
                Ok(payment)
            }
            Err(GatewayError::Timeout) => Err(RideError::RequestTimeout),
            Err(err) => Err(RideError::PaymentFailed(err.to_string())),
        }
    }

    /// Dismiss the completed ride and return to `Idle`.
    pub async fn acknowledge_completion(&self) -> Result<(), RideError> {
        let mut state = self.inner.lock().await;
        if state.phase != RidePhase::Completed {
            return Err(RideError::OutOfPhase {
                action: "acknowledge_completion",
                phase: state.phase,
            });
        }
        self.reset_to_idle(&mut state);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod transport_tests;
