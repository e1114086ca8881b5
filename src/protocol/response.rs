//! Reply interpretation and unsolicited indication parsing.
//!
//! The module answers every command with a reply frame echoing the opcode
//! with the high bit set. Independently of replies it emits indication
//! frames for asynchronous events: join completion, transmit completion and
//! received downlinks.

use bytes::Bytes;

use crate::error::{Error, JoinFailure, Result, TransmitFailure};
use crate::protocol::frame::RawFrame;
use crate::types::Downlink;

/// Join completion indication.
pub const IND_JOIN: u8 = 0x41;
/// Confirmed-uplink completion indication.
pub const IND_TX_CONFIRMED: u8 = 0x47;
/// Unconfirmed-uplink completion indication.
pub const IND_TX_UNCONFIRMED: u8 = 0x48;
/// Downlink received indication.
pub const IND_RX_MESSAGE: u8 = 0x49;

/// Transmit power by module power index, in dBm.
const TX_POWER_DBM: [u8; 6] = [20, 14, 11, 8, 5, 2];

/// Returns true when the opcode is an unsolicited indication.
#[must_use]
pub const fn is_indication(opcode: u8) -> bool {
    matches!(
        opcode,
        IND_JOIN | IND_TX_CONFIRMED | IND_TX_UNCONFIRMED | IND_RX_MESSAGE
    )
}

/// A reply to a command: opcode echo plus result bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Reply opcode (command opcode with the high bit set).
    pub opcode: u8,
    /// Result bytes.
    pub payload: Bytes,
}

impl Response {
    /// Interprets the first payload byte as a status code.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the reply carries no payload.
    pub fn status(&self) -> Result<u8> {
        self.payload.first().copied().ok_or_else(|| Error::Protocol {
            message: format!("reply 0x{:02X} carries no status byte", self.opcode),
        })
    }

    /// Returns the payload, checking its exact length first.
    pub fn fixed_payload(&self, expected: usize) -> Result<&[u8]> {
        if self.payload.len() == expected {
            Ok(&self.payload)
        } else {
            Err(Error::Protocol {
                message: format!(
                    "reply 0x{:02X} has {} payload bytes, expected {expected}",
                    self.opcode,
                    self.payload.len()
                ),
            })
        }
    }
}

impl From<RawFrame> for Response {
    fn from(frame: RawFrame) -> Self {
        Self {
            opcode: frame.opcode,
            payload: frame.payload,
        }
    }
}

/// Network activation status reported by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActivationStatus {
    /// No network session.
    NotActivated = 0,
    /// Join handshake in progress.
    Joining = 1,
    /// Network session active.
    Joined = 2,
    /// MAC layer error.
    MacError = 3,
}

impl ActivationStatus {
    /// Parses an activation status byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::NotActivated),
            1 => Some(Self::Joining),
            2 => Some(Self::Joined),
            3 => Some(Self::MacError),
            _ => None,
        }
    }
}

/// MAC session status reported by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionStatus {
    /// Ready for the next command.
    Idle = 0,
    /// A previous operation is still running.
    Busy = 1,
    /// No network session.
    NotActivated = 2,
    /// Transmission delayed by duty-cycle limits.
    Delayed = 3,
}

impl SessionStatus {
    /// Parses a session status byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Idle),
            1 => Some(Self::Busy),
            2 => Some(Self::NotActivated),
            3 => Some(Self::Delayed),
            _ => None,
        }
    }
}

/// Maps a join command status byte to a failure, zero meaning accepted.
#[must_use]
pub const fn join_failure(status: u8) -> Option<JoinFailure> {
    match status {
        0 => None,
        1 => Some(JoinFailure::InvalidParameter),
        _ => Some(JoinFailure::ModuleBusy),
    }
}

/// Maps a transmit command status byte to a failure, zero meaning accepted.
#[must_use]
pub const fn transmit_failure(status: u8) -> Option<TransmitFailure> {
    match status {
        0 => None,
        1 => Some(TransmitFailure::Busy),
        2 => Some(TransmitFailure::NotActivated),
        3 => Some(TransmitFailure::DutyCycle),
        4 => Some(TransmitFailure::PortNotSupported),
        5 => Some(TransmitFailure::LengthNotSupported),
        6 => Some(TransmitFailure::Silent),
        7 => Some(TransmitFailure::Failed),
        other => Some(TransmitFailure::Unknown(other)),
    }
}

/// An unsolicited indication from the module.
#[derive(Debug, Clone)]
pub enum Indication {
    /// Join handshake finished.
    Join {
        /// True when the network accepted the join.
        success: bool,
    },
    /// Confirmed uplink finished.
    TxConfirmed {
        /// True when the transmission succeeded.
        success: bool,
        /// Data rate used.
        data_rate: u8,
        /// Transmit power in dBm.
        tx_power_dbm: u8,
        /// True when a network acknowledgment was received.
        acknowledged: bool,
        /// Number of retries performed.
        retries: u8,
    },
    /// Unconfirmed uplink finished.
    TxUnconfirmed {
        /// True when the transmission succeeded.
        success: bool,
        /// Data rate used.
        data_rate: u8,
        /// Transmit power in dBm.
        tx_power_dbm: u8,
    },
    /// Downlink message received.
    Rx(Downlink),
}

impl Indication {
    /// Parses an indication frame.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for unknown indication opcodes or payloads
    /// with the wrong shape.
    pub fn parse(frame: &RawFrame) -> Result<Self> {
        match frame.opcode {
            IND_JOIN => {
                let payload = expect_len(frame, 1)?;
                Ok(Self::Join {
                    success: payload[0] == 0x00,
                })
            }
            IND_TX_CONFIRMED => {
                let payload = expect_len(frame, 5)?;
                Ok(Self::TxConfirmed {
                    success: payload[0] == 0x00,
                    data_rate: payload[1],
                    tx_power_dbm: tx_power(frame, payload[2])?,
                    acknowledged: payload[3] == 0x01,
                    retries: payload[4],
                })
            }
            IND_TX_UNCONFIRMED => {
                let payload = expect_len(frame, 3)?;
                Ok(Self::TxUnconfirmed {
                    success: payload[0] == 0x00,
                    data_rate: payload[1],
                    tx_power_dbm: tx_power(frame, payload[2])?,
                })
            }
            IND_RX_MESSAGE => parse_rx(frame),
            other => Err(Error::Protocol {
                message: format!("unknown indication opcode 0x{other:02X}"),
            }),
        }
    }
}

fn expect_len(frame: &RawFrame, expected: usize) -> Result<&[u8]> {
    if frame.payload.len() == expected {
        Ok(&frame.payload)
    } else {
        Err(Error::Protocol {
            message: format!(
                "indication 0x{:02X} has {} payload bytes, expected {expected}",
                frame.opcode,
                frame.payload.len()
            ),
        })
    }
}

fn tx_power(frame: &RawFrame, index: u8) -> Result<u8> {
    TX_POWER_DBM
        .get(usize::from(index))
        .copied()
        .ok_or_else(|| Error::Protocol {
            message: format!(
                "indication 0x{:02X} carries bad power index {index}",
                frame.opcode
            ),
        })
}

/// Downlink indication payload:
/// `[status] [type] [multicast] [data_rate] [slot] [frame_pending] [ack]
///  [data_flag] [rssi:2 LE] [snr] ([port] [data...])`
fn parse_rx(frame: &RawFrame) -> Result<Indication> {
    let payload = &frame.payload;
    if payload.len() < 11 {
        return Err(Error::Protocol {
            message: format!("downlink indication too short: {} bytes", payload.len()),
        });
    }

    let data_rate = payload[3];
    let slot = payload[4];
    if data_rate > 7 || slot > 2 {
        return Err(Error::Protocol {
            message: format!("downlink indication with bad data rate {data_rate} or slot {slot}"),
        });
    }

    let has_data = payload[7] == 0x01;
    let port = if has_data { payload.get(11).copied() } else { None };
    let data = if has_data && payload.len() > 12 {
        frame.payload.slice(12..)
    } else {
        Bytes::new()
    };

    Ok(Indication::Rx(Downlink {
        data_rate,
        slot,
        rssi_dbm: i16::from_le_bytes([payload[8], payload[9]]),
        snr_db: payload[10] as i8,
        frame_pending: payload[5] == 0x01,
        acknowledged: payload[6] == 0x01,
        port,
        data,
    }))
}
