//! Transport layer for module communication.
//!
//! The transport is a pure byte pipe with no framing knowledge; the driver
//! layers the frame codec on top. Currently only UART/serial is implemented.

pub mod serial;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// Trait for transport implementations.
pub trait Transport: Send {
    /// Opens the channel to the module.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Closes the channel.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Writes bytes to the module.
    fn write(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Reads whatever bytes arrive next, waiting at most `timeout`.
    ///
    /// Fails with a timeout error when nothing arrives in time.
    fn read(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

pub use serial::SerialTransport;
