//! ==============================================================================
//! producer.rs - where new readings come from
//! ==============================================================================
//!
//! purpose:
//!     three interchangeable sources, picked once at boot from `producer.mode`:
//!
//!     - demo:   uniform random readings in plausible ranges
//!     - serial: `temperature,pH,turbidity,waterLevel\n` lines pushed by an
//!               external sensor board over a tty / fifo / stdin
//!     - probe:  sample the sensors through the HAL (sensors.rs)
//!
//! line protocol:
//!     a line that is not valid utf-8 (line noise) is rejected as a whole.
//!     the first three commas split the line. if any of them is missing the
//!     whole line is rejected and the store keeps its previous reading.
//!     each field is then parsed on its own; text that is not a finite number
//!     reads as 0.0 (logged, not rejected).
//!
//! relationships:
//!     - used by: scheduler.rs (drives refreshes)
//!     - uses: sensors.rs + hal.rs (probe mode)
//!
//! ==============================================================================

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::config::{NodeConfig, ProducerMode};
use crate::domain::Reading;
use crate::hal::{self, SharedHal};
use crate::sensors::Probe;

// ==============================================================================
// line protocol
// ==============================================================================

/// error type for line-protocol input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// fewer than the three separators the format needs
    MissingSeparator { found: usize },
    /// raw bytes that do not decode as text
    NotText,
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineError::MissingSeparator { found } => {
                write!(f, "invalid data format: expected 3 commas, found {}", found)
            }
            LineError::NotText => write!(f, "invalid data format: line is not valid utf-8"),
        }
    }
}

impl std::error::Error for LineError {}

const FIELD_NAMES: [&str; 4] = ["temperature", "pH", "turbidity", "waterLevel"];

/// parse one `temperature,pH,turbidity,waterLevel` line
pub fn parse_line(line: &str) -> Result<Reading, LineError> {
    let parts: Vec<&str> = line.splitn(4, ',').collect();
    if parts.len() < 4 {
        return Err(LineError::MissingSeparator { found: parts.len() - 1 });
    }

    let mut values = [0.0f32; 4];
    for (i, text) in parts.iter().enumerate() {
        values[i] = parse_field(text).unwrap_or_else(|| {
            tracing::warn!(field = FIELD_NAMES[i], text = %text.trim(), "malformed number, using 0.0");
            0.0
        });
    }

    Ok(Reading::new(values[0], values[1], values[2], values[3]))
}

/// decode one raw line received from the source
pub fn decode_line(raw: &[u8]) -> Result<&str, LineError> {
    std::str::from_utf8(raw).map_err(|_| LineError::NotText)
}

fn parse_field(text: &str) -> Option<f32> {
    text.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

/// newline-delimited input from a serial device, fifo or stdin
pub struct LineSource {
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
}

impl LineSource {
    pub fn new(reader: Box<dyn AsyncRead + Unpin + Send>) -> Self {
        Self { reader: BufReader::new(reader) }
    }

    /// "-" reads stdin, anything else is opened as a file (tty, fifo, ...)
    pub async fn open(path: &str) -> Result<Self> {
        let reader: Box<dyn AsyncRead + Unpin + Send> = if path == "-" {
            Box::new(tokio::io::stdin())
        } else {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open line source {}", path))?;
            Box::new(file)
        };
        Ok(Self::new(reader))
    }

    /// next raw line without its `\n` / `\r\n` terminator, None at end of input.
    /// bytes are not decoded here; see [`decode_line`].
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

// ==============================================================================
// synthetic readings
// ==============================================================================

/// demo-mode generator. values are quantised the way a cheap board reports them:
/// hundredths for temperature and pH, whole units for turbidity and level.
pub struct SyntheticSource {
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn next_reading(&mut self) -> Reading {
        Reading {
            temperature: self.rng.gen_range(2000..3500) as f32 / 100.0,
            ph: self.rng.gen_range(650..850) as f32 / 100.0,
            turbidity: self.rng.gen_range(0..100) as f32,
            water_level: self.rng.gen_range(5..50) as f32,
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

// ==============================================================================
// producer
// ==============================================================================

pub enum Producer {
    Synthetic(SyntheticSource),
    Probe { probe: Probe, hal: SharedHal },
    Lines(LineSource),
}

impl Producer {
    pub async fn from_config(config: &NodeConfig, hal: &SharedHal) -> Result<Self> {
        Ok(match config.producer.mode {
            ProducerMode::Demo => Producer::Synthetic(SyntheticSource::new()),
            ProducerMode::Probe => Producer::Probe {
                probe: Probe::new(config.sensors.clone()),
                hal: hal.clone(),
            },
            ProducerMode::Serial => {
                Producer::Lines(LineSource::open(&config.producer.line_source).await?)
            }
        })
    }

    pub fn mode(&self) -> ProducerMode {
        match self {
            Producer::Synthetic(_) => ProducerMode::Demo,
            Producer::Probe { .. } => ProducerMode::Probe,
            Producer::Lines(_) => ProducerMode::Serial,
        }
    }

    /// take a fresh reading on a cadence tick. line sources are not polled,
    /// they refresh whenever a line arrives.
    pub async fn sample(&mut self) -> Result<Option<Reading>> {
        match self {
            Producer::Synthetic(source) => Ok(Some(source.next_reading())),
            Producer::Probe { probe, hal } => {
                let probe = probe.clone();
                let reading = hal::with_hal(hal, move |h| probe.sample(h)).await?;
                Ok(Some(reading))
            }
            Producer::Lines(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHal;

    #[test]
    fn test_parse_line_reference_scenario() {
        let r = parse_line("23.50,7.10,12.00,18.00").unwrap();
        assert_eq!(r, Reading::new(23.5, 7.1, 12.0, 18.0));
    }

    #[test]
    fn test_parse_line_fields_match_substrings() {
        let cases: [(&str, [f32; 4]); 4] = [
            ("0,0,0,0", [0.0, 0.0, 0.0, 0.0]),
            ("-127.00,14,999.5,-1", [-127.0, 14.0, 999.5, -1.0]),
            (" 21.3 , 6.8 ,4, 33.25\r", [21.3, 6.8, 4.0, 33.25]),
            ("1e1,2.5,3,4", [10.0, 2.5, 3.0, 4.0]),
        ];
        for (line, expected) in cases {
            let r = parse_line(line).unwrap();
            assert_eq!(
                [r.temperature, r.ph, r.turbidity, r.water_level],
                expected,
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn test_parse_line_rejects_missing_separators() {
        assert_eq!(parse_line("23.50,7.10"), Err(LineError::MissingSeparator { found: 1 }));
        assert_eq!(parse_line("23.50,7.10,12.00"), Err(LineError::MissingSeparator { found: 2 }));
        assert_eq!(parse_line(""), Err(LineError::MissingSeparator { found: 0 }));
    }

    #[test]
    fn test_parse_line_malformed_field_reads_zero() {
        let r = parse_line("abc,7.1,,nan").unwrap();
        assert_eq!(r, Reading::new(0.0, 7.1, 0.0, 0.0));
    }

    #[test]
    fn test_parse_line_extra_commas_land_in_last_field() {
        // the fourth field is "18,5", which is not a number
        let r = parse_line("23.5,7.1,12,18,5").unwrap();
        assert_eq!(r.water_level, 0.0);
        assert_eq!(r.turbidity, 12.0);
    }

    #[test]
    fn test_synthetic_ranges() {
        let mut source = SyntheticSource::seeded(42);
        for _ in 0..2000 {
            let r = source.next_reading();
            assert!((20.0..=35.0).contains(&r.temperature), "temperature {}", r.temperature);
            assert!((6.5..=8.5).contains(&r.ph), "pH {}", r.ph);
            assert!((0.0..100.0).contains(&r.turbidity), "turbidity {}", r.turbidity);
            assert!((5.0..50.0).contains(&r.water_level), "level {}", r.water_level);
            assert_eq!(r.turbidity.fract(), 0.0);
            assert!(r.validity().all());
        }
    }

    #[test]
    fn test_synthetic_seed_is_reproducible() {
        let a = SyntheticSource::seeded(7).next_reading();
        let b = SyntheticSource::seeded(7).next_reading();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_line_source_reads_lines() {
        let input: &'static [u8] = b"23.50,7.10,12.00,18.00\r\n23.50,7.10\n\xff\xfe\n1,2,3,4";
        let mut source = LineSource::new(Box::new(input));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some(&b"23.50,7.10,12.00,18.00"[..]));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some(&b"23.50,7.10"[..]));
        // noise is handed over as-is, not turned into an i/o error
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some(&b"\xff\xfe"[..]));
        // last line without a terminator
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some(&b"1,2,3,4"[..]));
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"23.50,7.10,12.00,18.00"), Ok("23.50,7.10,12.00,18.00"));
        assert_eq!(decode_line(b"\xff\xfe noise"), Err(LineError::NotText));
    }

    #[tokio::test]
    async fn test_line_source_missing_file() {
        assert!(LineSource::open("/nonexistent/aquanode-tty").await.is_err());
    }

    #[tokio::test]
    async fn test_producer_modes() {
        let hal = crate::hal::shared(MockHal::new(&Default::default()));
        let config = NodeConfig::default();

        let mut demo = Producer::from_config(&config, &hal).await.unwrap();
        assert_eq!(demo.mode(), ProducerMode::Demo);
        assert!(demo.sample().await.unwrap().is_some());

        let mut config = NodeConfig::default();
        config.producer.mode = ProducerMode::Probe;
        let mut probe = Producer::from_config(&config, &hal).await.unwrap();
        let reading = probe.sample().await.unwrap().unwrap();
        assert_eq!(reading.temperature, 24.0);
    }
}
