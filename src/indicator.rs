//! Status indicator driver.
//!
//! Maps the connection state to one of a few output patterns. The pattern is
//! a pure function of the state; only the blink phase depends on time.

use embassy_time::{Duration, Instant};
use embedded_hal::digital::OutputPin;

use crate::connection::ConnectionState;
use crate::fmt::Debug2Format;

const FAST_HALF_PERIOD: Duration = Duration::from_millis(100);
const SLOW_HALF_PERIOD: Duration = Duration::from_millis(500);
const BOOT_FLASH: Duration = Duration::from_millis(200);

/// Output pattern shown for a connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalPattern {
    Off,
    Solid,
    SlowBlink,
    FastBlink,
}

impl SignalPattern {
    pub fn for_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => SignalPattern::Off,
            ConnectionState::WifiConnecting | ConnectionState::Degraded => {
                SignalPattern::FastBlink
            }
            ConnectionState::WifiConnected | ConnectionState::BrokerConnecting => {
                SignalPattern::SlowBlink
            }
            ConnectionState::BrokerConnected => SignalPattern::Solid,
        }
    }

    /// Whether the output is lit at `elapsed` into the pattern.
    pub fn level_at(self, elapsed: Duration) -> bool {
        let half = match self {
            SignalPattern::Off => return false,
            SignalPattern::Solid => return true,
            SignalPattern::SlowBlink => SLOW_HALF_PERIOD,
            SignalPattern::FastBlink => FAST_HALF_PERIOD,
        };
        (elapsed.as_ticks() / half.as_ticks()) % 2 == 0
    }
}

/// Anything that can show the connection state to a person.
///
/// Called once per tick. Implementations must not fail the tick; output
/// errors are swallowed after logging.
pub trait StatusIndicator {
    fn show(&mut self, state: ConnectionState, now: Instant);
}

impl<I: StatusIndicator + ?Sized> StatusIndicator for &mut I {
    fn show(&mut self, state: ConnectionState, now: Instant) {
        (**self).show(state, now)
    }
}

/// Indicator for hosts without a status output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndicator;

impl StatusIndicator for NoIndicator {
    fn show(&mut self, _state: ConnectionState, _now: Instant) {}
}

/// Drives a GPIO, typically an LED.
pub struct PinIndicator<P> {
    pin: P,
    /// Level last written to the pin.
    level: Option<bool>,
    pattern: SignalPattern,
    pattern_since: Instant,
    boot_until: Option<Instant>,
    debug: bool,
}

impl<P: OutputPin> PinIndicator<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            level: None,
            pattern: SignalPattern::Off,
            pattern_since: Instant::from_ticks(0),
            boot_until: None,
            debug: false,
        }
    }

    /// Logs output failures.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn pattern(&self) -> SignalPattern {
        self.pattern
    }

    /// Whether the output was last driven high.
    pub fn is_lit(&self) -> bool {
        self.level == Some(true)
    }

    pub fn release(self) -> P {
        self.pin
    }

    fn write(&mut self, level: bool) {
        if self.level == Some(level) {
            return;
        }
        let result = if level {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        match result {
            Ok(()) => self.level = Some(level),
            // Retried on the next call.
            Err(e) => {
                if self.debug {
                    warn!("status output failed: {:?}", Debug2Format(&e));
                }
            }
        }
    }
}

impl<P: OutputPin> StatusIndicator for PinIndicator<P> {
    fn show(&mut self, state: ConnectionState, now: Instant) {
        let boot_until = *self
            .boot_until
            .get_or_insert_with(|| now.checked_add(BOOT_FLASH).unwrap_or(now));
        if now < boot_until {
            self.write(true);
            return;
        }

        let pattern = SignalPattern::for_state(state);
        if pattern != self.pattern {
            self.pattern = pattern;
            self.pattern_since = now;
        }
        let elapsed = now.checked_duration_since(self.pattern_since).unwrap_or_default();
        self.write(pattern.level_at(elapsed));
    }
}
