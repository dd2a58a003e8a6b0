//! Scale mass reader
//!
//! The scale streams `\r\n`-terminated weight lines while continuous-report mode is
//! on. Each poll takes everything buffered since the previous poll and reports the
//! most recent mass; a `?` on the last complete line flags an unsettled reading.

use crate::adapters::DeviceChannel;
use crate::error::AppResult;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, trace};

/// Enable continuous print
pub const CONTINUOUS_ON: &str = "CA";
/// Disable continuous print
pub const CONTINUOUS_OFF: &str = "0A";
/// Zero the scale
pub const TARE: &str = "T";

const LINE_END: &str = "\r\n";
const UNSTABLE_MARKER: char = '?';

#[allow(clippy::expect_used)]
static MASS_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d*\.?\d+").expect("mass token pattern is a valid literal"));

/// Result of one scale poll
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MassReading {
    /// Latest mass in grams, `None` until a complete line has arrived
    pub mass: Option<f64>,
    /// The scale marked the latest line as unsettled
    pub unstable: bool,
}

impl MassReading {
    /// No complete line available
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Parse a raw scale buffer.
///
/// Only complete lines count: the mass is the last numeric token of the last
/// terminated line, and an unterminated tail is ignored.
pub fn parse_scale_response(text: &str) -> MassReading {
    let Some((complete, _partial)) = text.rsplit_once(LINE_END) else {
        return MassReading::absent();
    };
    let last_complete = complete.rsplit(LINE_END).next().unwrap_or(complete);

    let mass = MASS_TOKEN
        .find_iter(last_complete)
        .last()
        .and_then(|token| token.as_str().parse::<f64>().ok());

    match mass {
        Some(mass) => MassReading {
            mass: Some(mass),
            unstable: last_complete.contains(UNSTABLE_MARKER),
        },
        None => MassReading::absent(),
    }
}

/// Polls the scale and owns its continuous-report mode flag
pub struct MassReader {
    channel: Box<dyn DeviceChannel>,
    continuous: bool,
    mode_settle: Duration,
}

impl MassReader {
    /// Wrap a connected scale channel
    pub fn new(channel: Box<dyn DeviceChannel>, mode_settle: Duration) -> Self {
        Self {
            channel,
            continuous: false,
            mode_settle,
        }
    }

    /// Whether continuous-report mode is believed to be on
    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    /// Turn continuous-report mode on and wait for it to take effect
    pub async fn enable_continuous(&mut self) -> AppResult<()> {
        self.channel.send(CONTINUOUS_ON).await?;
        tokio::time::sleep(self.mode_settle).await;
        self.continuous = true;
        debug!("Scale continuous print enabled");
        Ok(())
    }

    /// Turn continuous-report mode off
    pub async fn disable_continuous(&mut self) -> AppResult<()> {
        self.channel.send(CONTINUOUS_OFF).await?;
        tokio::time::sleep(self.mode_settle).await;
        self.continuous = false;
        debug!("Scale continuous print disabled");
        Ok(())
    }

    /// Zero the scale
    pub async fn tare(&mut self) -> AppResult<()> {
        self.channel.send(TARE).await?;
        Ok(())
    }

    /// Read the latest mass. Absent results are normal and must be tolerated.
    pub async fn poll(&mut self) -> AppResult<MassReading> {
        if !self.continuous {
            self.enable_continuous().await?;
        }

        let raw = self.channel.read_all().await?;
        let reading = parse_scale_response(&raw);
        trace!(?reading, "scale poll");
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    #[test]
    fn test_parse_requires_terminator() {
        assert_eq!(parse_scale_response("ST,+00012.5 g"), MassReading::absent());
        assert_eq!(parse_scale_response(""), MassReading::absent());
    }

    #[test]
    fn test_parse_takes_last_token() {
        let reading = parse_scale_response("ST,+00010.0 g\r\nST,+00012.5 g\r\n");
        assert_eq!(reading.mass, Some(12.5));
        assert!(!reading.unstable);
    }

    #[test]
    fn test_parse_flags_unstable_last_line() {
        let reading = parse_scale_response("ST,+00010.0 g\r\n?  +00012.5 g\r\n");
        assert_eq!(reading.mass, Some(12.5));
        assert!(reading.unstable);

        // only the last complete line counts
        let reading = parse_scale_response("?  +00010.0 g\r\nST,+00012.5 g\r\n");
        assert!(!reading.unstable);
    }

    #[test]
    fn test_parse_trailing_partial_line() {
        // an unterminated tail is never read as a mass
        let reading = parse_scale_response("?  +00010.0 g\r\nST,+0001");
        assert_eq!(reading.mass, Some(10.0));
        assert!(reading.unstable);

        let reading = parse_scale_response("ST,+00250.0 g\r\nST,+0000");
        assert_eq!(reading.mass, Some(250.0));
        assert!(!reading.unstable);
    }

    #[test]
    fn test_parse_without_digits() {
        assert_eq!(parse_scale_response("OL\r\n"), MassReading::absent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_enables_continuous_once() {
        let mock = MockAdapter::new("scale");
        mock.push_chunk("12.0 g\r\n");
        mock.push_chunk("13.0 g\r\n");
        let mut reader = MassReader::new(Box::new(mock.clone()), Duration::from_millis(500));

        assert_eq!(reader.poll().await.unwrap().mass, Some(12.0));
        assert_eq!(reader.poll().await.unwrap().mass, Some(13.0));
        assert_eq!(reader.poll().await.unwrap().mass, None);
        assert!(reader.is_continuous());
        assert_eq!(mock.count_sent(CONTINUOUS_ON), 1);

        reader.disable_continuous().await.unwrap();
        assert!(!reader.is_continuous());
        reader.poll().await.unwrap();
        assert_eq!(mock.count_sent(CONTINUOUS_ON), 2);
    }

    #[tokio::test]
    async fn test_tare() {
        let mock = MockAdapter::new("scale");
        let mut reader = MassReader::new(Box::new(mock.clone()), Duration::ZERO);
        reader.tare().await.unwrap();
        assert_eq!(mock.sent(), vec![TARE]);
    }
}
