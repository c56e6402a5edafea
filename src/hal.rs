//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     raw access to the four water sensors and the status leds.
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (using `rppal` + sysfs) and a development machine (using mocks).
//!
//! wiring (real hardware):
//!     - DS18B20 temperature probe on the 1-wire bus (kernel w1 driver, sysfs)
//!     - pH and turbidity boards on an ADS1115 ADC over i2c
//!     - HC-SR04 style ultrasonic sensor on two gpio pins (trig / echo)
//!     - four indicator leds, one per measured field
//!
//! relationships:
//!     - used by: sensors.rs (Probe turns raw samples into a Reading)
//!     - used by: relay.rs (lights indicator leds during an upload)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::Result;
use std::sync::{Arc, Mutex};

pub trait SensorHal: Send {
    /// probe temperature in celsius, None if the probe did not answer
    fn read_temperature(&mut self) -> Option<f32>;
    /// raw ADC count on `channel`
    fn read_adc(&mut self, channel: u8) -> Result<u16>;
    /// width of the ultrasonic echo pulse, None on timeout
    fn echo_pulse_us(&mut self, timeout_us: u64) -> Option<u64>;
    fn set_indicator(&mut self, pin: u8, on: bool) -> Result<()>;
}

/// the HAL is shared by the scheduler (probe mode) and the relay (leds)
pub type SharedHal = Arc<Mutex<Box<dyn SensorHal>>>;

pub fn shared(hal: impl SensorHal + 'static) -> SharedHal {
    Arc::new(Mutex::new(Box::new(hal)))
}

/// run `f` against the HAL on the blocking pool.
///
/// adc conversions and echo timing busy-wait for milliseconds, which must not
/// stall the async runtime.
pub async fn with_hal<T, F>(hal: &SharedHal, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn SensorHal) -> T + Send + 'static,
{
    let hal = hal.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = hal.lock().map_err(|_| anyhow::anyhow!("hal mutex poisoned"))?;
        Ok(f(&mut **guard))
    })
    .await
    .map_err(|e| anyhow::anyhow!("hal task join error: {}", e))?
}

/// parse the kernel's `w1_slave` file of a DS18B20
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub fn parse_w1_slave(content: &str) -> Option<f32> {
    let mut lines = content.lines();
    if !lines.next()?.trim_end().ends_with("YES") {
        return None;
    }
    let (_, milli) = lines.next()?.rsplit_once("t=")?;
    milli.trim().parse::<i32>().ok().map(|m| m as f32 / 1000.0)
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build)
// ==============================================================================================

/// fixed raw samples: 24°C, pH 7, full-scale turbidity output, 40cm of water in a 240cm tank
#[cfg_attr(feature = "hardware", allow(dead_code))]
#[derive(Debug, Default)]
pub struct MockHal {
    pub temperature: Option<f32>,
    pub adc: std::collections::HashMap<u8, u16>,
    pub echo_us: Option<u64>,
    pub indicators: std::collections::HashMap<u8, bool>,
}

#[cfg_attr(feature = "hardware", allow(dead_code))]
impl MockHal {
    pub fn new(config: &crate::config::SensorsConfig) -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        // raw counts that land on pH 7.0 (2.5V) and a 3.3V turbidity output
        let ph_raw = (2.5 / config.vref * config.adc_max).round() as u16;
        let turbidity_raw = config.adc_max.round() as u16;
        let mut adc = std::collections::HashMap::new();
        adc.insert(config.ph_channel, ph_raw);
        adc.insert(config.turbidity_channel, turbidity_raw);
        Self {
            temperature: Some(24.0),
            adc,
            echo_us: Some(11_662),
            indicators: Default::default(),
        }
    }
}

impl SensorHal for MockHal {
    fn read_temperature(&mut self) -> Option<f32> {
        tracing::debug!("[MOCK W1] temperature {:?}", self.temperature);
        self.temperature
    }

    fn read_adc(&mut self, channel: u8) -> Result<u16> {
        let raw = self
            .adc
            .get(&channel)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no mock sample for adc channel {}", channel))?;
        tracing::debug!("[MOCK ADC] channel {} raw {}", channel, raw);
        Ok(raw)
    }

    fn echo_pulse_us(&mut self, timeout_us: u64) -> Option<u64> {
        self.echo_us.filter(|us| *us <= timeout_us)
    }

    fn set_indicator(&mut self, pin: u8, on: bool) -> Result<()> {
        tracing::debug!("[MOCK LED] Pin {} {}", pin, if on { "ON" } else { "OFF" });
        self.indicators.insert(pin, on);
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub use real::PiHal;

#[cfg(feature = "hardware")]
mod real {
    use super::*;
    use crate::config::SensorsConfig;
    use rppal::gpio::{Gpio, InputPin, OutputPin};
    use rppal::i2c::I2c;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    const ADS1115_CONVERSION: u8 = 0x00;
    const ADS1115_CONFIG: u8 = 0x01;

    pub struct PiHal {
        i2c: I2c,
        trig: OutputPin,
        echo: InputPin,
        leds: HashMap<u8, OutputPin>,
        w1_dir: PathBuf,
    }

    impl PiHal {
        pub fn new(config: &SensorsConfig) -> Result<Self> {
            tracing::info!("Using REAL HARDWARE HAL (rppal)");
            let gpio = Gpio::new()?;

            let mut i2c = I2c::new()?;
            i2c.set_slave_address(config.adc_i2c_address)?;

            let mut trig = gpio.get(config.trig_pin)?.into_output();
            trig.set_low();
            let echo = gpio.get(config.echo_pin)?.into_input();

            let mut leds = HashMap::new();
            let pins = config.leds;
            for pin in [pins.temperature, pins.ph, pins.turbidity, pins.water_level] {
                let mut led = gpio.get(pin)?.into_output();
                led.set_low();
                leds.insert(pin, led);
            }

            Ok(Self {
                i2c,
                trig,
                echo,
                leds,
                w1_dir: PathBuf::from(&config.w1_devices_dir),
            })
        }

        fn w1_slave_path(&self) -> Option<PathBuf> {
            std::fs::read_dir(&self.w1_dir)
                .ok()?
                .filter_map(|e| e.ok())
                .find(|e| e.file_name().to_string_lossy().starts_with("28-"))
                .map(|e| e.path().join("w1_slave"))
        }

        fn wait_for(&self, high: bool, deadline: Instant) -> Option<Instant> {
            while self.echo.is_high() != high {
                if Instant::now() > deadline {
                    return None;
                }
            }
            Some(Instant::now())
        }
    }

    impl SensorHal for PiHal {
        fn read_temperature(&mut self) -> Option<f32> {
            let path = self.w1_slave_path()?;
            let content = std::fs::read_to_string(path).ok()?;
            parse_w1_slave(&content)
        }

        fn read_adc(&mut self, channel: u8) -> Result<u16> {
            if channel > 3 {
                anyhow::bail!("ADS1115 has no channel {}", channel);
            }
            // single-shot, AINx vs GND, PGA 4.096V, 128 SPS, comparator off
            let config: u16 = 0x8000 | ((0x4 | channel as u16) << 12) | (0b001 << 9) | 0x0100 | (0b100 << 5) | 0x0003;
            let [hi, lo] = config.to_be_bytes();
            self.i2c.write(&[ADS1115_CONFIG, hi, lo])?;
            std::thread::sleep(Duration::from_millis(9));

            self.i2c.write(&[ADS1115_CONVERSION])?;
            let mut buf = [0u8; 2];
            self.i2c.read(&mut buf)?;
            Ok(i16::from_be_bytes(buf).max(0) as u16)
        }

        fn echo_pulse_us(&mut self, timeout_us: u64) -> Option<u64> {
            self.trig.set_low();
            std::thread::sleep(Duration::from_micros(2));
            self.trig.set_high();
            std::thread::sleep(Duration::from_micros(10));
            self.trig.set_low();

            let deadline = Instant::now() + Duration::from_micros(timeout_us);
            let rise = self.wait_for(true, deadline)?;
            let fall = self.wait_for(false, deadline)?;
            Some(fall.duration_since(rise).as_micros() as u64)
        }

        fn set_indicator(&mut self, pin: u8, on: bool) -> Result<()> {
            let led = self
                .leds
                .get_mut(&pin)
                .ok_or_else(|| anyhow::anyhow!("gpio {} is not an indicator", pin))?;
            if on { led.set_high(); } else { led.set_low(); }
            Ok(())
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorsConfig;

    #[test]
    fn test_parse_w1_slave() {
        let ok = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        assert_eq!(parse_w1_slave(ok), Some(23.125));

        let negative = "ff ff : crc=aa YES\nff ff t=-1250\n";
        assert_eq!(parse_w1_slave(negative), Some(-1.25));
    }

    #[test]
    fn test_parse_w1_slave_rejects_bad_crc() {
        let bad = "72 01 4b 46 7f ff 0e 10 57 : crc=57 NO\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        assert_eq!(parse_w1_slave(bad), None);
        assert_eq!(parse_w1_slave(""), None);
    }

    #[test]
    fn test_mock_hal_samples() {
        let config = SensorsConfig::default();
        let mut hal = MockHal::new(&config);
        assert_eq!(hal.read_temperature(), Some(24.0));
        assert_eq!(hal.read_adc(config.ph_channel).unwrap(), 3102);
        assert!(hal.read_adc(7).is_err());
        assert_eq!(hal.echo_pulse_us(30_000), Some(11_662));
        assert_eq!(hal.echo_pulse_us(1_000), None);
    }

    #[tokio::test]
    async fn test_with_hal_runs_on_blocking_pool() {
        let hal = shared(MockHal::new(&SensorsConfig::default()));
        let temp = with_hal(&hal, |h| h.read_temperature()).await.unwrap();
        assert_eq!(temp, Some(24.0));

        with_hal(&hal, |h| h.set_indicator(26, true)).await.unwrap().unwrap();
    }
}
