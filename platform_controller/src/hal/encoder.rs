//! Absolute-position model over a free-running, overflow-prone up-counter.
//!
//! The encoder chip can only count up and must periodically be cleared.
//! Absolute position is reconstructed as `buffer + live * direction sign`,
//! where `buffer` accumulates everything the live counter has been cleared
//! of. While a clear pulse is in flight, reads of the live counter are
//! blocked and the live term is treated as zero.

use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use hexapod_lib::Direction;

/// Width of the hardware counter.
pub const COUNTER_BITS: u32 = 12;

/// Credit folded into the buffer when the counter nears overflow.
///
/// The overflow watch fires on the rising edge of bit `COUNTER_BITS - 2`,
/// i.e. when the live count reaches this value.
pub const OVERFLOW_CREDIT: i64 = 1 << (COUNTER_BITS - 2);

// how long the clear line is held high
const CLEAR_PULSE: Duration = Duration::from_millis(5);

// how long to wait after lowering the clear line before reads resume
const CLEAR_SETTLE: Duration = Duration::from_millis(50);

/// Live counter interface of the encoder chip.
///
/// Implementations are internally synchronized (hardware pin reads, or
/// atomics in the simulated chip), so shared references suffice.
pub trait CounterChip: Send {
    /// Current free-running count.
    fn read(&self) -> u32;

    /// Drives the chip's clear line.
    fn set_clear(&self, level: bool);
}

/// Stable absolute position over a [`CounterChip`].
///
/// All buffer mutations (fold-on-stop, reset, overflow credit) and the
/// blocked flag live under one mutex, so position reads are never torn and
/// the overflow path cannot race a concurrent read. The clear pulse holds
/// the lock only to flip the flag and the line, not across its sleeps, so
/// reads during the pulse window return the buffer immediately.
pub struct Encoder<C: CounterChip> {
    chip: C,
    state: Mutex<EncoderState>,
}

struct EncoderState {
    buffer: i64,
    blocked: bool,
}

impl<C: CounterChip> Encoder<C> {
    pub fn new(chip: C) -> Self {
        let encoder = Self {
            chip,
            state: Mutex::new(EncoderState {
                buffer: 0,
                blocked: false,
            }),
        };
        encoder.clear_counter();
        encoder
    }

    /// Absolute position for the given drive direction.
    pub fn position(&self, direction: Direction) -> i64 {
        let state = self.lock();
        let live = if state.blocked {
            0
        } else {
            i64::from(self.chip.read())
        };
        state.buffer + live * direction.sign()
    }

    /// Current live count, or 0 while reads are blocked.
    pub fn live_count(&self) -> u32 {
        let state = self.lock();
        if state.blocked {
            0
        } else {
            self.chip.read()
        }
    }

    /// Folds the live contribution into the buffer and clears the counter.
    ///
    /// Called on every explicit stop so direction changes never corrupt the
    /// accumulated position.
    pub fn fold_into_buffer(&self, direction: Direction) {
        {
            let mut state = self.lock();
            let live = if state.blocked {
                0
            } else {
                i64::from(self.chip.read())
            };
            state.buffer += live * direction.sign();
        }
        self.clear_counter();
    }

    /// Zeroes the accumulated position. Called once homing completes.
    pub fn reset(&self) {
        self.lock().buffer = 0;
        self.clear_counter();
    }

    /// Credits the buffer for a counter that is about to overflow, then
    /// clears it so the hardware never actually wraps.
    ///
    /// In hardware this runs from the counter chip's edge callback; callers
    /// share the state mutex with every other mutation, so the credit and
    /// any concurrent position read serialize.
    pub fn on_approaching_overflow(&self, direction: Direction) {
        self.lock().buffer += OVERFLOW_CREDIT * direction.sign();
        self.clear_counter();
    }

    /// Pulses the chip's clear line and blocks live reads until the chip
    /// has settled.
    pub fn clear_counter(&self) {
        {
            let mut state = self.lock();
            state.blocked = true;
            self.chip.set_clear(true);
        }
        thread::sleep(CLEAR_PULSE);
        self.chip.set_clear(false);
        thread::sleep(CLEAR_SETTLE);
        self.lock().blocked = false;
    }

    fn lock(&self) -> MutexGuard<'_, EncoderState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
