//! UART/serial transport implementation.
//!
//! The module sits on a UART (115200 8N1 on the reference board); this
//! transport wraps it with bounded reads.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Default baud rate of the module UART.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay after opening the port before commands are sent.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Configuration for the serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/serial0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening the port before sending commands.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport to the module.
pub struct SerialTransport {
    config: SerialConfig,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.stream.is_some() {
                return Ok(());
            }

            tracing::info!("connecting to serial port: {}", self.config.port);

            let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            // Let the module settle after the port toggles its lines.
            tokio::time::sleep(self.config.connection_delay).await;

            // Drain stale bytes left over from before we opened the port, so
            // the first reply is not parsed against old indication data.
            let mut buf = [0u8; 256];
            let mut drained = 0usize;
            while let Ok(Ok(n)) =
                tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await
            {
                if n == 0 {
                    break;
                }
                drained += n;
            }
            if drained > 0 {
                tracing::debug!("drained {} stale bytes", drained);
            }

            self.stream = Some(stream);
            tracing::info!("connected to serial port");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.stream.take().is_some() {
                tracing::info!("disconnecting from serial port");
            }
            Ok(())
        })
    }

    fn write(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            tracing::trace!("writing {} bytes", data.len());
            stream.write_all(&data).await.map_err(Error::Io)?;
            stream.flush().await.map_err(Error::Io)?;
            Ok(())
        })
    }

    fn read(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            let mut buf = [0u8; 256];
            match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) => Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "serial port closed",
                ))),
                Ok(Ok(n)) => {
                    tracing::trace!("read {} bytes", n);
                    Ok(Bytes::copy_from_slice(&buf[..n]))
                }
                Ok(Err(e)) => Err(Error::Io(e)),
                Err(_) => Err(Error::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
