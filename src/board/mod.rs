//! Board Support
//!
//! Button debouncing and status LED logic. Pins, GPIOTE channels and the
//! confirmation timer belong to the firmware binary and are reached through
//! the small traits defined here.

pub mod button;
pub mod leds;

pub use button::{on_button, Button, ConfirmTimer, Debouncer, PinLevels};
pub use leds::{Indicators, Led, LedPins, StatusLeds};
