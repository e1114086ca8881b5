//! Command opcodes and typed command construction.
//!
//! Commands are sent to the module to perform actions or request data.
//! Each command is an opcode plus a variable-length parameter block; the
//! on-wire framing (start byte, length, checksum) is added by
//! [`crate::protocol::frame`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::{AppKey, DataRate, JoinCredentials};

/// Reply opcodes echo the command opcode with this bit set.
pub const REPLY_FLAG: u8 = 0x80;

/// Maximum parameter block length (one length byte minus checksum room).
pub const MAX_PARAMS_LEN: usize = 253;

/// Command opcodes understood by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandOpcode {
    /// Soft-reset the module, clearing the network session.
    Reset = 0x30,
    /// Restore factory defaults.
    FactoryReset = 0x31,
    /// Write bytes to module EEPROM.
    EepromWrite = 0x32,
    /// Read bytes from module EEPROM.
    EepromRead = 0x33,
    /// Read the firmware version.
    GetFwVersion = 0x34,
    /// Read the module serial number.
    GetSerialNo = 0x35,
    /// Read the device EUI.
    GetDevEui = 0x36,
    /// Start the network join handshake.
    Join = 0x40,
    /// Read the network activation status.
    GetActivationStatus = 0x42,
    /// Write the OTAA application key.
    SetAppKey = 0x43,
    /// Queue an uplink for transmission.
    TxMsg = 0x46,
    /// Read the MAC session status.
    GetSessionStatus = 0x4A,
    /// Set the data rate for the next uplink.
    SetNextDataRate = 0x4B,
    /// Set the battery level reported to the network.
    SetBatteryLevel = 0x50,
    /// Read the battery level previously set.
    GetBatteryLevel = 0x51,
}

impl From<CommandOpcode> for u8 {
    fn from(cmd: CommandOpcode) -> Self {
        cmd as Self
    }
}

/// Join activation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinMode {
    /// Activation by personalization.
    Abp = 0x00,
    /// Over-the-air activation.
    Otaa = 0x01,
}

/// EEPROM address of the application (join) EUI.
pub const EEPROM_APP_EUI_ADDR: u8 = 0x08;

/// An opcode plus parameter bytes, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: CommandOpcode,
    params: Bytes,
}

impl Command {
    fn new(opcode: CommandOpcode, params: Bytes) -> Self {
        assert!(params.len() <= MAX_PARAMS_LEN, "command parameters too long");
        Self { opcode, params }
    }

    /// Returns the command opcode.
    #[must_use]
    pub const fn opcode(&self) -> CommandOpcode {
        self.opcode
    }

    /// Returns the opcode the module will echo in its reply.
    #[must_use]
    pub const fn reply_opcode(&self) -> u8 {
        self.opcode as u8 | REPLY_FLAG
    }

    /// Returns the parameter bytes.
    #[must_use]
    pub const fn params(&self) -> &Bytes {
        &self.params
    }

    /// Soft-reset command.
    #[must_use]
    pub fn reset() -> Self {
        Self::new(CommandOpcode::Reset, Bytes::new())
    }

    /// Factory-reset command.
    #[must_use]
    pub fn factory_reset() -> Self {
        Self::new(CommandOpcode::FactoryReset, Bytes::new())
    }

    /// EEPROM write starting at `address`.
    #[must_use]
    pub fn eeprom_write(address: u8, data: &[u8]) -> Self {
        assert!(
            usize::from(address) + data.len() <= 0x100,
            "EEPROM write past end of address space"
        );
        let mut buf = BytesMut::with_capacity(1 + data.len());
        buf.put_u8(address);
        buf.put_slice(data);
        Self::new(CommandOpcode::EepromWrite, buf.freeze())
    }

    /// EEPROM read of `count` bytes starting at `address`.
    #[must_use]
    pub fn eeprom_read(address: u8, count: u8) -> Self {
        assert!(
            usize::from(address) + usize::from(count) <= 0x100,
            "EEPROM read past end of address space"
        );
        let mut buf = BytesMut::with_capacity(2);
        buf.put_u8(address);
        buf.put_u8(count);
        Self::new(CommandOpcode::EepromRead, buf.freeze())
    }

    /// Firmware version query.
    #[must_use]
    pub fn get_fw_version() -> Self {
        Self::new(CommandOpcode::GetFwVersion, Bytes::new())
    }

    /// Serial number query.
    #[must_use]
    pub fn get_serial_no() -> Self {
        Self::new(CommandOpcode::GetSerialNo, Bytes::new())
    }

    /// Device EUI query.
    #[must_use]
    pub fn get_device_eui() -> Self {
        Self::new(CommandOpcode::GetDevEui, Bytes::new())
    }

    /// Join command in the given activation mode.
    #[must_use]
    pub fn join(mode: JoinMode) -> Self {
        Self::new(CommandOpcode::Join, Bytes::copy_from_slice(&[mode as u8]))
    }

    /// Activation status query.
    #[must_use]
    pub fn get_activation_status() -> Self {
        Self::new(CommandOpcode::GetActivationStatus, Bytes::new())
    }

    /// Application key write. The module stores the key LSB first.
    #[must_use]
    pub fn set_app_key(key: &AppKey) -> Self {
        let mut buf = BytesMut::with_capacity(key.as_bytes().len());
        buf.extend(key.as_bytes().iter().rev());
        Self::new(CommandOpcode::SetAppKey, buf.freeze())
    }

    /// Application EUI write. Lives in EEPROM, stored LSB first.
    #[must_use]
    pub fn set_app_eui(credentials: &JoinCredentials) -> Self {
        let mut reversed = *credentials.app_eui.as_bytes();
        reversed.reverse();
        Self::eeprom_write(EEPROM_APP_EUI_ADDR, &reversed)
    }

    /// Uplink transmission on `port`, confirmed or unconfirmed.
    #[must_use]
    pub fn transmit(port: u8, confirmed: bool, data: &[u8]) -> Self {
        assert!((1..=223).contains(&port), "frame port out of range");
        assert!(!data.is_empty(), "nothing to transmit");
        let mut buf = BytesMut::with_capacity(2 + data.len());
        buf.put_u8(u8::from(confirmed));
        buf.put_u8(port);
        buf.put_slice(data);
        Self::new(CommandOpcode::TxMsg, buf.freeze())
    }

    /// Session status query.
    #[must_use]
    pub fn get_session_status() -> Self {
        Self::new(CommandOpcode::GetSessionStatus, Bytes::new())
    }

    /// Data rate for the next uplink.
    #[must_use]
    pub fn set_next_data_rate(data_rate: DataRate) -> Self {
        Self::new(
            CommandOpcode::SetNextDataRate,
            Bytes::copy_from_slice(&[data_rate.into()]),
        )
    }

    /// Battery level reported to the network as part of the MAC layer.
    ///
    /// 0 means mains powered, 1-254 is the level, 255 means unmeasurable.
    #[must_use]
    pub fn set_battery_level(level: u8) -> Self {
        Self::new(
            CommandOpcode::SetBatteryLevel,
            Bytes::copy_from_slice(&[level]),
        )
    }

    /// Battery level query.
    #[must_use]
    pub fn get_battery_level() -> Self {
        Self::new(CommandOpcode::GetBatteryLevel, Bytes::new())
    }
}
