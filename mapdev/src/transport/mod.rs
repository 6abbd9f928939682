//! Physical transports carrying raw 32-bit word transfers to a device.
//!
//! The core is transport agnostic: everything above this trait addresses the
//! device as BAR-relative byte offsets. A transport may additionally expose
//! per-line interrupt waiters; the device then runs one waiter thread per
//! primary interrupt while asynchronous reads are active.

pub mod mock;
pub mod uio;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("device is not open")]
    NotOpen,
    #[error("access of {n_bytes} bytes at bar {bar}, address {address} is out of range")]
    OutOfRange { bar: u64, address: u64, n_bytes: usize },
    #[error("{0}")]
    Device(String),
}

/// The trait implemented by all transports.
///
/// `read`/`write` move whole 32-bit words; `address` is a byte offset within
/// the window `bar` and must be word aligned.
pub trait Transport: Send + 'static {
    /// # Errors
    /// Returns a [`TransportError`] if the device cannot be reached.
    fn open(&mut self) -> Result<(), TransportError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// # Errors
    /// Returns a [`TransportError`] on transfer failures.
    fn read(&mut self, bar: u64, address: u64, data: &mut [i32]) -> Result<(), TransportError>;

    /// # Errors
    /// Returns a [`TransportError`] on transfer failures.
    fn write(&mut self, bar: u64, address: u64, data: &[i32]) -> Result<(), TransportError>;

    /// Hands out a waiter for one hardware interrupt line, if this transport
    /// can deliver interrupts. Must be called on an open transport.
    fn interrupt_waiter(&mut self, line: u32) -> Option<Box<dyn InterruptWaiter>> {
        let _ = line;
        None
    }
}

/// Blocks for hardware events on one interrupt line.
pub trait InterruptWaiter: Send {
    /// Waits up to `timeout` for events. Returns the number of events that
    /// occurred since the last call (0 on timeout).
    ///
    /// # Errors
    /// Returns a [`TransportError`] when the event source is gone; the caller
    /// stops waiting.
    fn wait(&mut self, timeout: Duration) -> Result<u32, TransportError>;
}
