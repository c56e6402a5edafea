//! ==============================================================================
//! sensors.rs - raw samples to physical units
//! ==============================================================================
//!
//! purpose:
//!     the deterministic acquisition path (probe mode). reads every sensor
//!     through the HAL and converts raw values into a Reading.
//!
//! conversions:
//!     voltage     = raw * vref / adc_max
//!     pH          = 7 + (2.5 - v) / 0.18                   clamped to [0, 14]
//!     turbidity   = -1120.4 v^2 + 5742.3 v - 4352.9        floored at 0 (NTU)
//!     distance    = echo_us * 0.0343 / 2                   (cm, speed of sound)
//!     water level = tank_height - distance                 -1 when out of range
//!
//!     the formulas are the stock ones shipped with the sensor boards.
//!     calibration is not attempted.
//!
//! ==============================================================================

use crate::config::SensorsConfig;
use crate::domain::{Reading, PH_MAX, PH_MIN, TEMPERATURE_FAULT, WATER_LEVEL_FAULT};
use crate::hal::SensorHal;

/// speed of sound in cm per microsecond
const SOUND_CM_PER_US: f32 = 0.0343;

pub fn adc_voltage(raw: u16, vref: f32, adc_max: f32) -> f32 {
    raw as f32 * (vref / adc_max)
}

pub fn ph_from_voltage(v: f32) -> f32 {
    (7.0 + (2.5 - v) / 0.18).clamp(PH_MIN, PH_MAX)
}

pub fn turbidity_from_voltage(v: f32) -> f32 {
    (-1120.4 * v * v + 5742.3 * v - 4352.9).max(0.0)
}

/// water above the tank floor, or the fault sentinel
pub fn water_level_from_echo(echo_us: Option<u64>, tank_height_cm: f32) -> f32 {
    let Some(us) = echo_us else {
        return WATER_LEVEL_FAULT;
    };
    let distance = us as f32 * SOUND_CM_PER_US / 2.0;
    if distance <= 0.0 || distance >= tank_height_cm {
        return WATER_LEVEL_FAULT;
    }
    tank_height_cm - distance
}

/// samples every sensor once per refresh
#[derive(Debug, Clone)]
pub struct Probe {
    config: SensorsConfig,
}

impl Probe {
    pub fn new(config: SensorsConfig) -> Self {
        Self { config }
    }

    /// one full acquisition. faults become sentinels, never errors.
    pub fn sample(&self, hal: &mut dyn SensorHal) -> Reading {
        let cfg = &self.config;

        let temperature = match hal.read_temperature() {
            Some(t) if t != TEMPERATURE_FAULT => t,
            _ => {
                tracing::warn!("temperature probe did not answer, check wiring / pull-up");
                TEMPERATURE_FAULT
            }
        };

        // a failed conversion reads as 0V, same as a floating input
        let mut volts = |channel: u8, name: &str| match hal.read_adc(channel) {
            Ok(raw) => adc_voltage(raw, cfg.vref, cfg.adc_max),
            Err(e) => {
                tracing::warn!(channel, "{} adc read failed: {:#}", name, e);
                0.0
            }
        };
        let ph_volts = volts(cfg.ph_channel, "pH");
        let turbidity_volts = volts(cfg.turbidity_channel, "turbidity");

        let water_level =
            water_level_from_echo(hal.echo_pulse_us(cfg.echo_timeout_us), cfg.tank_height_cm);
        if water_level == WATER_LEVEL_FAULT {
            tracing::warn!("ultrasonic read error");
        }

        tracing::debug!(ph_volts, turbidity_volts, "analog sample");

        Reading {
            temperature,
            ph: ph_from_voltage(ph_volts),
            turbidity: turbidity_from_voltage(turbidity_volts),
            water_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_ph_conversion() {
        assert!(close(ph_from_voltage(2.5), 7.0));
        assert!(close(ph_from_voltage(2.32), 8.0));
        // out of the board's range
        assert_eq!(ph_from_voltage(0.0), 14.0);
        assert_eq!(ph_from_voltage(5.0), 0.0);
    }

    #[test]
    fn test_turbidity_never_negative() {
        assert_eq!(turbidity_from_voltage(0.0), 0.0);
        assert_eq!(turbidity_from_voltage(0.5), 0.0);
        assert!(turbidity_from_voltage(3.0) > 0.0);
    }

    #[test]
    fn test_water_level_from_echo() {
        // 200cm to the surface in a 240cm tank
        assert!(close(water_level_from_echo(Some(11_662), 240.0), 40.0));
        assert_eq!(water_level_from_echo(None, 240.0), WATER_LEVEL_FAULT);
        assert_eq!(water_level_from_echo(Some(0), 240.0), WATER_LEVEL_FAULT);
        // echo longer than the tank is deep
        assert_eq!(water_level_from_echo(Some(20_000), 240.0), WATER_LEVEL_FAULT);
    }

    #[test]
    fn test_adc_voltage() {
        assert!(close(adc_voltage(4095, 3.3, 4095.0), 3.3));
        assert_eq!(adc_voltage(0, 3.3, 4095.0), 0.0);
    }

    #[test]
    fn test_probe_sample_with_mock() {
        let config = SensorsConfig::default();
        let mut hal = MockHal::new(&config);
        let reading = Probe::new(config).sample(&mut hal);

        assert_eq!(reading.temperature, 24.0);
        assert!(close(reading.ph, 7.0));
        assert!(reading.turbidity > 0.0);
        assert!(close(reading.water_level, 40.0));
        assert!(reading.validity().all());
    }

    #[test]
    fn test_probe_faults_become_sentinels() {
        let config = SensorsConfig::default();
        let mut hal = MockHal::new(&config);
        hal.temperature = None;
        hal.echo_us = None;
        hal.adc.clear();

        let reading = Probe::new(config).sample(&mut hal);
        assert_eq!(reading.temperature, TEMPERATURE_FAULT);
        assert_eq!(reading.water_level, WATER_LEVEL_FAULT);
        // 0V on the pH input pins the clamp
        assert_eq!(reading.ph, 14.0);
        assert_eq!(reading.turbidity, 0.0);
        assert!(!reading.validity().temperature);
        assert!(!reading.validity().water_level);
    }
}
