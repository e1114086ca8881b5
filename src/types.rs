//! Value types exchanged with the module.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::Error;

/// Length of a device or application EUI in bytes.
pub const EUI_LEN: usize = 8;

/// Length of an application key in bytes.
pub const APP_KEY_LEN: usize = 16;

/// An 8-byte device EUI, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevEui([u8; EUI_LEN]);

impl DevEui {
    /// Creates a device EUI from bytes, MSB first.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; EUI_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the EUI as a byte slice, MSB first.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; EUI_LEN] {
        &self.0
    }
}

impl fmt::Display for DevEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

/// An 8-byte application (join) EUI, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppEui([u8; EUI_LEN]);

impl AppEui {
    /// Creates an application EUI from bytes, MSB first.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; EUI_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the EUI as a byte slice, MSB first.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; EUI_LEN] {
        &self.0
    }
}

impl fmt::Display for AppEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl FromStr for AppEui {
    type Err = Error;

    /// Parses a 16-character hex string, MSB first.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidEui {
            reason: e.to_string(),
        })?;
        let bytes: [u8; EUI_LEN] = bytes.try_into().map_err(|v: Vec<u8>| Error::InvalidEui {
            reason: format!("expected {EUI_LEN} bytes, got {}", v.len()),
        })?;
        Ok(Self(bytes))
    }
}

/// A 16-byte OTAA application key, most significant byte first.
///
/// `Debug` does not print the key material.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AppKey([u8; APP_KEY_LEN]);

impl AppKey {
    /// Creates an application key from bytes, MSB first.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; APP_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the key as a byte slice, MSB first.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; APP_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppKey(..)")
    }
}

impl FromStr for AppKey {
    type Err = Error;

    /// Parses a 32-character hex string, MSB first.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidKey {
            reason: e.to_string(),
        })?;
        let bytes: [u8; APP_KEY_LEN] =
            bytes.try_into().map_err(|v: Vec<u8>| Error::InvalidKey {
                reason: format!("expected {APP_KEY_LEN} bytes, got {}", v.len()),
            })?;
        Ok(Self(bytes))
    }
}

/// OTAA join credentials, caller-supplied and write-only.
#[derive(Debug, Clone, Copy)]
pub struct JoinCredentials {
    /// Application (join) EUI.
    pub app_eui: AppEui,
    /// Application key.
    pub app_key: AppKey,
}

/// LoRaWAN data rate index (EU868 numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataRate {
    /// SF12 / 125 kHz.
    Sf12 = 0,
    /// SF11 / 125 kHz.
    Sf11 = 1,
    /// SF10 / 125 kHz.
    Sf10 = 2,
    /// SF9 / 125 kHz.
    Sf9 = 3,
    /// SF8 / 125 kHz.
    Sf8 = 4,
    /// SF7 / 125 kHz.
    Sf7 = 5,
    /// SF7 / 250 kHz.
    Sf7Bw250 = 6,
    /// FSK / 50 kHz.
    Fsk = 7,
}

impl From<DataRate> for u8 {
    fn from(dr: DataRate) -> Self {
        dr as Self
    }
}

/// Outcome of an accepted and transmitted uplink.
#[derive(Debug, Clone, Copy)]
pub struct UplinkReport {
    /// Whether the uplink was sent confirmed.
    pub confirmed: bool,
    /// Data rate the module actually used.
    pub data_rate: u8,
    /// Transmit power in dBm.
    pub tx_power_dbm: u8,
    /// True when the network acknowledged the frame (confirmed uplinks only).
    pub acknowledged: bool,
    /// Number of retries the module performed (confirmed uplinks only).
    pub retries: u8,
}

/// A downlink message received from the network.
#[derive(Debug, Clone)]
pub struct Downlink {
    /// Receive data rate.
    pub data_rate: u8,
    /// Receive window slot (1 or 2).
    pub slot: u8,
    /// Received signal strength in dBm.
    pub rssi_dbm: i16,
    /// Signal to noise ratio in dB.
    pub snr_db: i8,
    /// Another downlink frame is pending on the network server.
    pub frame_pending: bool,
    /// An acknowledgment was piggybacked on this downlink.
    pub acknowledged: bool,
    /// LoRaWAN frame port, if any application data was carried.
    pub port: Option<u8>,
    /// Application data, empty when the downlink carried none.
    pub data: Bytes,
}
