//! ==============================================================================
//! domain.rs - the water quality reading
//! ==============================================================================
//!
//! purpose:
//!     defines the one snapshot type every other module passes around.
//!     sensor faults are in-band sentinels, never errors:
//!     - temperature = -127 (probe missing / bus fault)
//!     - water_level = -1   (ultrasonic echo out of range)
//!
//! wire shape (snapshot endpoint and push frames):
//!     {"temperature":23.50,"pH":7.10,"turbidity":12.00,"waterLevel":18.00}
//!
//! ==============================================================================

use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

/// temperature reported when the probe could not be read
pub const TEMPERATURE_FAULT: f32 = -127.0;

/// water level reported when the echo was lost or out of range
pub const WATER_LEVEL_FAULT: f32 = -1.0;

pub const PH_MIN: f32 = 0.0;
pub const PH_MAX: f32 = 14.0;

/// current sensor snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Reading {
    /// water temperature in celsius
    #[serde(serialize_with = "two_decimals")]
    pub temperature: f32,
    /// acidity, 0-14
    #[serde(rename = "pH", serialize_with = "two_decimals")]
    pub ph: f32,
    /// turbidity in NTU
    #[serde(serialize_with = "two_decimals")]
    pub turbidity: f32,
    /// water level above tank floor in cm
    #[serde(rename = "waterLevel", serialize_with = "two_decimals")]
    pub water_level: f32,
}

/// per-field "is this a real measurement" flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Validity {
    pub temperature: bool,
    #[serde(rename = "pH")]
    pub ph: bool,
    pub turbidity: bool,
    #[serde(rename = "waterLevel")]
    pub water_level: bool,
}

impl Validity {
    pub fn all(&self) -> bool {
        self.temperature && self.ph && self.turbidity && self.water_level
    }
}

impl Reading {
    pub fn new(temperature: f32, ph: f32, turbidity: f32, water_level: f32) -> Self {
        Self { temperature, ph, turbidity, water_level }
    }

    /// enforce the physical-range invariants before the reading is stored.
    ///
    /// pH is clamped to [0, 14], turbidity is floored at 0, and any
    /// non-finite field becomes 0.0. sentinels pass through untouched.
    pub fn sanitized(self) -> Self {
        let finite = |v: f32| if v.is_finite() { v } else { 0.0 };
        Self {
            temperature: finite(self.temperature),
            ph: finite(self.ph).clamp(PH_MIN, PH_MAX),
            turbidity: finite(self.turbidity).max(0.0),
            water_level: finite(self.water_level),
        }
    }

    pub fn validity(&self) -> Validity {
        Validity {
            temperature: self.temperature != TEMPERATURE_FAULT,
            ph: (PH_MIN..=PH_MAX).contains(&self.ph),
            turbidity: self.turbidity >= 0.0,
            water_level: self.water_level >= 0.0,
        }
    }

    /// json payload shared by the snapshot endpoint and push frames
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// readings are rendered with a fixed two-decimal precision (23.50, not 23.5),
// which serde_json cannot do for a plain float. emit a pre-formatted raw value.
fn two_decimals<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::Error;

    let raw = RawValue::from_string(format!("{:.2}", value)).map_err(S::Error::custom)?;
    raw.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape_uses_wire_names_and_two_decimals() {
        let r = Reading::new(23.5, 7.1, 12.0, 18.0);
        assert_eq!(
            r.to_json().unwrap(),
            r#"{"temperature":23.50,"pH":7.10,"turbidity":12.00,"waterLevel":18.00}"#
        );
    }

    #[test]
    fn test_sentinels_serialize_and_mark_invalid() {
        let r = Reading::new(TEMPERATURE_FAULT, 7.0, 3.0, WATER_LEVEL_FAULT);
        assert_eq!(
            r.to_json().unwrap(),
            r#"{"temperature":-127.00,"pH":7.00,"turbidity":3.00,"waterLevel":-1.00}"#
        );

        let v = r.validity();
        assert!(!v.temperature);
        assert!(v.ph);
        assert!(v.turbidity);
        assert!(!v.water_level);
        assert!(!v.all());
    }

    #[test]
    fn test_sanitized_clamps_ph_and_turbidity() {
        let r = Reading::new(21.0, 15.2, -4.0, 30.0).sanitized();
        assert_eq!(r.ph, 14.0);
        assert_eq!(r.turbidity, 0.0);

        let r = Reading::new(21.0, -0.5, 1.0, 30.0).sanitized();
        assert_eq!(r.ph, 0.0);
    }

    #[test]
    fn test_sanitized_replaces_non_finite() {
        let r = Reading::new(f32::NAN, f32::INFINITY, f32::NAN, f32::NEG_INFINITY).sanitized();
        assert_eq!(r, Reading::new(0.0, 0.0, 0.0, 0.0));
        assert!(r.to_json().is_ok());
    }

    #[test]
    fn test_sanitized_keeps_sentinels() {
        let r = Reading::new(TEMPERATURE_FAULT, 7.0, 0.0, WATER_LEVEL_FAULT).sanitized();
        assert_eq!(r.temperature, TEMPERATURE_FAULT);
        assert_eq!(r.water_level, WATER_LEVEL_FAULT);
    }
}
