use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{
    GeoPoint, PaymentMethod, PaymentStatus, RideId, RiderId, RideStatus, VehicleClass,
};

/// Per-class fare estimate for one pickup/drop pair, as returned by
/// `GET /api/rides/calculate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareQuote {
    pub distance_km: f64,
    pub bike_fare: f64,
    pub auto_fare: f64,
    pub car_fare: f64,
    pub premier_fare: f64,
}

impl FareQuote {
    pub fn price_for(&self, class: VehicleClass) -> f64 {
        match class {
            VehicleClass::Bike => self.bike_fare,
            VehicleClass::Auto => self.auto_fare,
            VehicleClass::Car => self.car_fare,
            VehicleClass::Premier => self.premier_fare,
        }
    }
}

/// Body of `POST /api/rides/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideBookingRequest {
    pub passenger_id: RiderId,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub drop_latitude: f64,
    pub drop_longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_area: Option<String>,
    pub vehicle_type: VehicleClass,
}

impl RideBookingRequest {
    pub fn new(
        passenger_id: RiderId,
        pickup: GeoPoint,
        drop_off: GeoPoint,
        vehicle_type: VehicleClass,
    ) -> Self {
        Self {
            passenger_id,
            pickup_latitude: pickup.latitude,
            pickup_longitude: pickup.longitude,
            drop_latitude: drop_off.latitude,
            drop_longitude: drop_off.longitude,
            pickup_area: None,
            drop_area: None,
            vehicle_type,
        }
    }
}

/// Ride snapshot as the backend serializes it, both over REST and on the
/// per-ride push topic. Every field except id and status is optional: the
/// backend omits driver details until a driver accepts and drops the OTP once
/// the trip starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRecord {
    pub id: RideId,
    pub status: RideStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fare: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rider_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_plate_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
}

impl RideRecord {
    pub fn has_driver(&self) -> bool {
        self.driver_name.is_some()
    }

    /// Merge a fresher snapshot into this record, keeping locally known
    /// fields where the update omits them.
    pub fn absorb(&mut self, update: RideRecord) {
        self.status = update.status;
        if update.fare.is_some() {
            self.fare = update.fare;
        }
        if update.distance_km.is_some() {
            self.distance_km = update.distance_km;
        }
        if update.otp.is_some() {
            self.otp = update.otp;
        }
        if update.pickup_area.is_some() {
            self.pickup_area = update.pickup_area;
        }
        if update.drop_area.is_some() {
            self.drop_area = update.drop_area;
        }
        if update.rider_name.is_some() {
            self.rider_name = update.rider_name;
        }
        if update.driver_name.is_some() {
            self.driver_name = update.driver_name;
        }
        if update.driver_phone.is_some() {
            self.driver_phone = update.driver_phone;
        }
        if update.vehicle_plate_number.is_some() {
            self.vehicle_plate_number = update.vehicle_plate_number;
        }
        if update.driver_rating.is_some() {
            self.driver_rating = update.driver_rating;
        }
        if update.created_at.is_some() {
            self.created_at = update.created_at;
        }
    }
}

/// Payment record as returned by the payment endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: i64,
    pub ride_id: RideId,
    pub amount: f64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NaiveDateTime>,
}

/// Body of `POST /api/payments/rides/{rideId}/initiate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiateBody {
    pub payment_method: PaymentMethod,
}

/// Client-to-server frames on the push socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

/// Server-to-client frame on the push socket: a ride snapshot tagged with the
/// topic it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFrame {
    pub topic: String,
    pub payload: RideRecord,
}

pub fn ride_topic(ride_id: RideId) -> String {
    format!("ride/{}", ride_id.0)
}
