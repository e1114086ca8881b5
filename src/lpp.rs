//! Cayenne LPP payload encoding.
//!
//! Each sensor reading becomes one fixed-layout record,
//! `[channel:1][type:1][value: type-specific width]`, values big-endian at
//! the fixed-point scale the LPP convention defines per type. Records are
//! concatenated in input order. Encoding is pure and deterministic.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::EncodingError;

/// A sensor value with its physical quantity and LPP scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Digital input (0 or 1).
    DigitalInput(u8),
    /// Digital output (0 or 1).
    DigitalOutput(u8),
    /// Analog input, 0.01 resolution, signed.
    AnalogInput(f32),
    /// Analog output, 0.01 resolution, signed.
    AnalogOutput(f32),
    /// Illuminance in lux.
    Illuminance(u16),
    /// Presence (0 or 1).
    Presence(u8),
    /// Temperature in Celsius, 0.1 resolution, signed.
    Temperature(f32),
    /// Relative humidity in percent, 0.5 resolution.
    Humidity(f32),
    /// Barometric pressure in hPa, 0.1 resolution.
    Barometer(f32),
    /// Voltage in V, 0.01 resolution.
    Voltage(f32),
    /// GPS position: degrees at 0.0001 resolution, altitude in m at 0.01.
    Gps {
        latitude: f64,
        longitude: f64,
        altitude: f64,
    },
}

impl Value {
    /// Returns the LPP type code.
    #[must_use]
    pub const fn type_code(&self) -> u8 {
        match self {
            Self::DigitalInput(_) => 0,
            Self::DigitalOutput(_) => 1,
            Self::AnalogInput(_) => 2,
            Self::AnalogOutput(_) => 3,
            Self::Illuminance(_) => 101,
            Self::Presence(_) => 102,
            Self::Temperature(_) => 103,
            Self::Humidity(_) => 104,
            Self::Barometer(_) => 115,
            Self::Voltage(_) => 116,
            Self::Gps { .. } => 136,
        }
    }

    /// Returns the encoded width of the value bytes.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::DigitalInput(_) | Self::DigitalOutput(_) | Self::Presence(_) | Self::Humidity(_) => 1,
            Self::AnalogInput(_)
            | Self::AnalogOutput(_)
            | Self::Illuminance(_)
            | Self::Temperature(_)
            | Self::Barometer(_)
            | Self::Voltage(_) => 2,
            Self::Gps { .. } => 9,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::DigitalInput(_) => "digital input",
            Self::DigitalOutput(_) => "digital output",
            Self::AnalogInput(_) => "analog input",
            Self::AnalogOutput(_) => "analog output",
            Self::Illuminance(_) => "illuminance",
            Self::Presence(_) => "presence",
            Self::Temperature(_) => "temperature",
            Self::Humidity(_) => "humidity",
            Self::Barometer(_) => "barometer",
            Self::Voltage(_) => "voltage",
            Self::Gps { .. } => "GPS",
        }
    }

    fn encode_into(self, channel: u8, buf: &mut BytesMut) -> Result<(), EncodingError> {
        let out_of_range = EncodingError::OutOfRange {
            kind: self.kind(),
            channel,
        };

        match self {
            Self::DigitalInput(v) | Self::DigitalOutput(v) | Self::Presence(v) => buf.put_u8(v),
            Self::AnalogInput(v) | Self::AnalogOutput(v) => {
                buf.put_i16(scaled_i16(v, 100.0).ok_or(out_of_range)?);
            }
            Self::Illuminance(v) => buf.put_u16(v),
            Self::Temperature(v) => {
                buf.put_i16(scaled_i16(v, 10.0).ok_or(out_of_range)?);
            }
            Self::Humidity(v) => {
                buf.put_u8(scaled_u8(v, 2.0).ok_or(out_of_range)?);
            }
            Self::Barometer(v) => {
                buf.put_u16(scaled_u16(v, 10.0).ok_or(out_of_range)?);
            }
            Self::Voltage(v) => {
                buf.put_u16(scaled_u16(v, 100.0).ok_or(out_of_range)?);
            }
            Self::Gps {
                latitude,
                longitude,
                altitude,
            } => {
                put_i24(buf, scaled_i24(latitude, 10_000.0).ok_or(out_of_range)?);
                put_i24(buf, scaled_i24(longitude, 10_000.0).ok_or(out_of_range)?);
                put_i24(buf, scaled_i24(altitude, 100.0).ok_or(out_of_range)?);
            }
        }
        Ok(())
    }
}

/// A channel-tagged sensor reading, consumed by [`encode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Channel number distinguishing multiple sensors of the same type.
    pub channel: u8,
    /// The measured value.
    pub value: Value,
}

impl Reading {
    /// Creates a reading on the given channel.
    #[must_use]
    pub const fn new(channel: u8, value: Value) -> Self {
        Self { channel, value }
    }
}

/// Encodes readings into an LPP payload of at most `max_len` bytes.
///
/// Records appear in input order. The size check runs before any value
/// conversion, so a payload one record too large fails without partial
/// output.
///
/// # Errors
///
/// Returns [`EncodingError::TooLarge`] when the encoded payload would exceed
/// `max_len`, or [`EncodingError::OutOfRange`] when a value cannot be
/// represented at its type's fixed-point scale.
pub fn encode(readings: &[Reading], max_len: usize) -> Result<Bytes, EncodingError> {
    let size: usize = readings.iter().map(|r| 2 + r.value.encoded_len()).sum();
    if size > max_len {
        return Err(EncodingError::TooLarge { size, max: max_len });
    }

    let mut buf = BytesMut::with_capacity(size);
    for reading in readings {
        buf.put_u8(reading.channel);
        buf.put_u8(reading.value.type_code());
        reading.value.encode_into(reading.channel, &mut buf)?;
    }
    Ok(buf.freeze())
}

fn scaled_i16(value: f32, scale: f32) -> Option<i16> {
    let raw = (value * scale).round();
    (f32::from(i16::MIN)..=f32::from(i16::MAX))
        .contains(&raw)
        .then_some(raw as i16)
}

fn scaled_u16(value: f32, scale: f32) -> Option<u16> {
    let raw = (value * scale).round();
    (0.0..=f32::from(u16::MAX))
        .contains(&raw)
        .then_some(raw as u16)
}

fn scaled_u8(value: f32, scale: f32) -> Option<u8> {
    let raw = (value * scale).round();
    (0.0..=f32::from(u8::MAX))
        .contains(&raw)
        .then_some(raw as u8)
}

fn scaled_i24(value: f64, scale: f64) -> Option<i32> {
    const LIMIT: f64 = (1 << 23) as f64;
    let raw = (value * scale).round();
    (-LIMIT..LIMIT).contains(&raw).then_some(raw as i32)
}

fn put_i24(buf: &mut BytesMut, value: i32) {
    buf.put_slice(&value.to_be_bytes()[1..]);
}
