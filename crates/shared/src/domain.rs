use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(RideId);
id_newtype!(RiderId);
id_newtype!(DriverId);

/// A resolved pickup or drop coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Backend bean validation ranges: latitude [-90, 90], longitude [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VehicleClass {
    Bike,
    Auto,
    Car,
    Premier,
}

impl VehicleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Bike => "bike",
            VehicleClass::Auto => "auto",
            VehicleClass::Car => "car",
            VehicleClass::Premier => "premier",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown vehicle class: {0}")]
pub struct UnknownVehicleClass(pub String);

impl std::str::FromStr for VehicleClass {
    type Err = UnknownVehicleClass;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "bike" => Ok(VehicleClass::Bike),
            "auto" => Ok(VehicleClass::Auto),
            "car" => Ok(VehicleClass::Car),
            "premier" => Ok(VehicleClass::Premier),
            other => Err(UnknownVehicleClass(other.to_string())),
        }
    }
}

/// Server-side ride status as it appears on the wire. Statuses this client
/// does not know about deserialize as `Unknown` instead of failing, so a
/// newer backend cannot break update handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RideStatus {
    Requested,
    Accepted,
    Started,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl RideStatus {
    /// Position of the status on the forward-only ride progression.
    /// `Cancelled` and `Unknown` sit outside the progression.
    pub fn progress(&self) -> Option<u8> {
        match self {
            RideStatus::Requested => Some(0),
            RideStatus::Accepted => Some(1),
            RideStatus::Started => Some(2),
            RideStatus::Completed => Some(3),
            RideStatus::Cancelled | RideStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
}

#[derive(Debug, Error)]
#[error("unknown payment method: {0}")]
pub struct UnknownPaymentMethod(pub String);

impl std::str::FromStr for PaymentMethod {
    type Err = UnknownPaymentMethod;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "upi" => Ok(PaymentMethod::Upi),
            other => Err(UnknownPaymentMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ride_status_parses_backend_strings() {
        let status: RideStatus = serde_json::from_str("\"ACCEPTED\"").expect("parse");
        assert_eq!(status, RideStatus::Accepted);
    }

    #[test]
    fn unknown_ride_status_does_not_fail_deserialization() {
        let status: RideStatus = serde_json::from_str("\"DRIVER_NAPPING\"").expect("parse");
        assert_eq!(status, RideStatus::Unknown);
        assert_eq!(status.progress(), None);
    }

    #[test]
    fn progress_orders_the_active_statuses() {
        let ranks: Vec<_> = [
            RideStatus::Requested,
            RideStatus::Accepted,
            RideStatus::Started,
            RideStatus::Completed,
        ]
        .iter()
        .map(|s| s.progress().expect("active status"))
        .collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn geo_point_validity_ranges() {
        assert!(GeoPoint::new(25.59, 85.13).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn vehicle_class_wire_form_is_uppercase() {
        assert_eq!(
            serde_json::to_string(&VehicleClass::Premier).expect("serialize"),
            "\"PREMIER\""
        );
        assert_eq!(
            "car".parse::<VehicleClass>().expect("parse"),
            VehicleClass::Car
        );
    }
}
