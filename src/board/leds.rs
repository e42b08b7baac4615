//! Status LEDs
//!
//! Three indicators: BLE activity, link state and serial activity. The
//! pattern is computed in the poll context; [`StatusLeds`] only touches a pin
//! when its level changes.

use embassy_time::{Duration, Instant};

use crate::config::TimingConfig;
use crate::core::time;
use crate::state::LinkStatus;

/// Half period of the advertising blink
pub const ADVERTISING_BLINK: Duration = Duration::from_millis(125);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Led {
    BleActivity,
    Link,
    UartActivity,
}

impl Led {
    pub const ALL: [Led; 3] = [Led::BleActivity, Led::Link, Led::UartActivity];
}

/// Output side of the LEDs
pub trait LedPins {
    fn set(&mut self, led: Led, on: bool);
}

/// Desired LED levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Indicators {
    pub ble_activity: bool,
    pub link: bool,
    pub uart_activity: bool,
}

impl Indicators {
    pub const ALL_ON: Indicators = Indicators {
        ble_activity: true,
        link: true,
        uart_activity: true,
    };

    pub const ALL_OFF: Indicators = Indicators {
        ble_activity: false,
        link: false,
        uart_activity: false,
    };

    /// Pattern for the current state
    ///
    /// All LEDs stay lit until start-up completes and stay dark when the
    /// host disabled LED status.
    pub fn compute(
        init_done: bool,
        led_status: bool,
        link: &LinkStatus,
        now: Instant,
        last_ble: Option<Instant>,
        last_uart: Option<Instant>,
        timing: &TimingConfig,
    ) -> Self {
        if !init_done {
            return Self::ALL_ON;
        }
        if !led_status {
            return Self::ALL_OFF;
        }

        let recent = |last: Option<Instant>, pulse: Duration| last.is_some_and(|at| !time::elapsed(now, at, pulse));
        let link_on = if link.is_connected() {
            true
        } else if link.advertising {
            (now.as_millis() / ADVERTISING_BLINK.as_millis()) % 2 == 0
        } else {
            false
        };

        Self {
            ble_activity: recent(last_ble, timing.ble_activity_pulse),
            link: link_on,
            uart_activity: recent(last_uart, timing.uart_activity_pulse),
        }
    }

    pub fn get(&self, led: Led) -> bool {
        match led {
            Led::BleActivity => self.ble_activity,
            Led::Link => self.link,
            Led::UartActivity => self.uart_activity,
        }
    }
}

/// Drives the pins, writing only changed levels
pub struct StatusLeds<P: LedPins> {
    pins: P,
    shown: Option<Indicators>,
}

impl<P: LedPins> StatusLeds<P> {
    pub fn new(pins: P) -> Self {
        Self { pins, shown: None }
    }

    pub fn show(&mut self, wanted: Indicators) {
        for led in Led::ALL {
            let on = wanted.get(led);
            if self.shown.map(|shown| shown.get(led)) != Some(on) {
                self.pins.set(led, on);
            }
        }
        self.shown = Some(wanted);
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }
}
