// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use chrono::{DateTime, Utc};

pub const CLOCK_CADENCE: Duration = Duration::from_millis(1000);
pub const PING_CADENCE: Duration = Duration::from_millis(5000);
pub const PING_PAYLOAD: &str = "Pong!";

/// Supplies the text frame sent on each tick of a connection's send loop.
pub trait PayloadSource: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Delay between successive sends.
    fn cadence(&self) -> Duration;

    fn next_payload(&mut self) -> String;
}

/// Current UTC time, e.g. `Oct 14 2026 16:18:03.127 UTC`.
#[derive(Debug, Clone)]
pub struct ClockPayload {
    cadence: Duration,
}

impl ClockPayload {
    pub fn new(cadence: Duration) -> Self {
        Self { cadence }
    }
}

impl Default for ClockPayload {
    fn default() -> Self {
        Self::new(CLOCK_CADENCE)
    }
}

impl PayloadSource for ClockPayload {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    fn next_payload(&mut self) -> String {
        format_clock(Utc::now())
    }
}

pub fn format_clock(at: DateTime<Utc>) -> String {
    at.format("%b %d %Y %H:%M:%S%.3f UTC").to_string()
}

/// The literal `Pong!`.
#[derive(Debug, Clone)]
pub struct PingPayload {
    cadence: Duration,
}

impl PingPayload {
    pub fn new(cadence: Duration) -> Self {
        Self { cadence }
    }
}

impl Default for PingPayload {
    fn default() -> Self {
        Self::new(PING_CADENCE)
    }
}

impl PayloadSource for PingPayload {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    fn next_payload(&mut self) -> String {
        PING_PAYLOAD.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn clock_format_matches_wire_shape() -> anyhow::Result<()> {
        let at = Utc
            .with_ymd_and_hms(2026, 3, 7, 9, 5, 2)
            .single()
            .ok_or_else(|| anyhow::anyhow!("ambiguous timestamp"))?
            + chrono::Duration::milliseconds(42);
        assert_eq!(format_clock(at), "Mar 07 2026 09:05:02.042 UTC");
        Ok(())
    }

    #[test]
    fn default_cadences() {
        assert_eq!(ClockPayload::default().cadence(), Duration::from_millis(1000));
        assert_eq!(PingPayload::default().cadence(), Duration::from_millis(5000));
    }

    #[test]
    fn ping_payload_is_constant() {
        let mut source = PingPayload::default();
        assert_eq!(source.next_payload(), "Pong!");
        assert_eq!(source.next_payload(), "Pong!");
    }

    #[test]
    fn clock_payload_ends_with_utc() {
        let mut source = ClockPayload::default();
        let payload = source.next_payload();
        assert!(payload.ends_with(" UTC"), "payload: {payload}");
        assert_eq!(payload.len(), "Mar 07 2026 09:05:02.042 UTC".len());
    }
}
