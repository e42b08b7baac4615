//! Button Debounce
//!
//! Edges are captured speculatively and confirmed by one shared single-shot
//! timer. A second edge on a pin before the timer fires is a bounce and
//! cancels that pin's pending change. Buttons are active low.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_time::Duration;

use crate::core::intents::{Intent, PendingIntents};

/// Single-shot confirmation timer
pub trait ConfirmTimer {
    fn stop(&mut self);
    fn start(&mut self, delay: Duration);
}

/// Current physical pin levels
pub trait PinLevels {
    fn is_high(&self, pin: u8) -> bool;
}

/// Per-pin stable levels and pending confirmations, one bit per pin
pub struct Debouncer {
    levels: AtomicU32,
    pending: AtomicU32,
    delay: Duration,
}

impl Debouncer {
    /// All pins start released (high)
    pub const fn new(delay: Duration) -> Self {
        Self {
            levels: AtomicU32::new(u32::MAX),
            pending: AtomicU32::new(0),
            delay,
        }
    }

    /// Edge seen on `pin`; restarts the confirmation timer
    pub fn on_edge<T: ConfirmTimer>(&self, pin: u8, level_high: bool, timer: &mut T) {
        let bit = 1u32 << pin;
        timer.stop();

        let was_pending = self.pending.fetch_xor(bit, Ordering::AcqRel) & bit != 0;
        if was_pending {
            trace!("BUTTON: bounce on pin {}", pin);
        } else if level_high {
            self.levels.fetch_or(bit, Ordering::AcqRel);
        } else {
            self.levels.fetch_and(!bit, Ordering::AcqRel);
        }

        if self.pending.load(Ordering::Acquire) != 0 {
            timer.start(self.delay);
        }
    }

    /// Confirmation timer fired
    ///
    /// Emits `(pin, pressed)` for every pending pin whose level still matches
    /// the captured one.
    pub fn on_timer<P: PinLevels>(&self, pins: &P, mut handler: impl FnMut(u8, bool)) {
        let pending = self.pending.swap(0, Ordering::AcqRel);
        let levels = self.levels.load(Ordering::Acquire);

        for pin in 0..u32::BITS as u8 {
            let bit = 1u32 << pin;
            if pending & bit == 0 {
                continue;
            }
            let high = pins.is_high(pin);
            if high == (levels & bit != 0) {
                handler(pin, !high);
            } else {
                trace!("BUTTON: pin {} changed before confirmation", pin);
            }
        }
    }

    /// Last confirmed or captured level
    pub fn is_pressed(&self, pin: u8) -> bool {
        self.levels.load(Ordering::Acquire) & (1 << pin) == 0
    }

    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }
}

/// The two user buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    /// Reset; held at start-up enables PA/LNA
    One,
    /// LED status toggle
    Two,
}

/// Map a confirmed button event to its intent; releases do nothing
pub fn on_button(intents: &PendingIntents, button: Button, pressed: bool) {
    if !pressed {
        return;
    }
    info!("BUTTON: {:?} pressed", button);
    match button {
        Button::One => intents.raise(Intent::ExecReset),
        Button::Two => intents.raise(Intent::ToggleLedStatus),
    }
}
