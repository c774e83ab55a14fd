//! Fault injection for heap file I/O, scoped to the current thread.

use std::cell::Cell;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    HeapRead,
    HeapWrite,
    HeapAppend,
}

impl FailPoint {
    fn bit(self) -> u8 {
        1 << self as u8
    }
}

thread_local! {
    static ARMED: Cell<u8> = const { Cell::new(0) };
}

/// Makes `point` fail on this thread until the returned guard is dropped.
#[must_use]
pub fn arm(point: FailPoint) -> Armed {
    ARMED.with(|armed| armed.set(armed.get() | point.bit()));
    Armed(point)
}

pub struct Armed(FailPoint);

impl Drop for Armed {
    fn drop(&mut self) {
        ARMED.with(|armed| armed.set(armed.get() & !self.0.bit()));
    }
}

/// Errors if `point` is armed on this thread.
pub fn check(point: FailPoint) -> io::Result<()> {
    if ARMED.with(|armed| armed.get() & point.bit() != 0) {
        log::warn!("injected failure at {point:?}");
        return Err(io::Error::other(format!("injected failure at {point:?}")));
    }
    Ok(())
}
