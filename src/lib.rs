//! # mipot
//!
//! A Rust driver library for Mipot 32001353 LoRaWAN modules.
//!
//! This library provides async communication with the module over UART,
//! covering OTAA provisioning, joining, Cayenne LPP sensor uplinks and
//! downlink reception.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Typed commands, replies and unsolicited indications
//! - Explicit session lifecycle with per-operation preconditions
//! - Cayenne LPP payload encoding for sensor readings
//!
//! ## Quick Start
//!
//! ```no_run
//! use mipot::{JoinCredentials, Mipot, Reading, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mipot::Error> {
//!     let driver = Mipot::serial("/dev/serial0");
//!     driver.connect().await?;
//!
//!     println!("Device EUI: {}", driver.get_identity().await?);
//!
//!     let credentials = JoinCredentials {
//!         app_eui: "70B3D57ED0001234".parse()?,
//!         app_key: "000102030405060708090A0B0C0D0E0F".parse()?,
//!     };
//!     driver.set_join_credentials(&credentials).await?;
//!     driver.join().await?;
//!
//!     let report = driver
//!         .send_readings(&[Reading::new(1, Value::Temperature(21.5))], true)
//!         .await?;
//!     println!("Sent at DR{} with {} retries", report.data_rate, report.retries);
//!
//!     driver.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Low-level protocol types (frames, commands, replies, indications)
//! - [`types`] - Data structures (EUIs, keys, uplink reports, downlinks)
//! - [`transport`] - Transport implementations (currently UART/serial)
//! - [`lpp`] - Cayenne LPP payload encoding
//! - [`session`] - Session lifecycle state machine
//! - [`driver`] - High-level [`Mipot`] driver

pub mod driver;
pub mod error;
pub mod lpp;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use driver::{DriverConfig, Mipot};
pub use error::{EncodingError, Error, FrameError, JoinFailure, Result, TransmitFailure};
pub use lpp::{Reading, Value};
pub use protocol::{ActivationStatus, CommandOpcode, Indication, JoinMode, SessionStatus};
pub use session::{SessionFault, SessionState};
pub use transport::{SerialTransport, serial::SerialConfig, serial::list_ports};
pub use types::{
    AppEui, AppKey, DataRate, DevEui, Downlink, JoinCredentials, UplinkReport,
};
