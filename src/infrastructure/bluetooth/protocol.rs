//! IR Blaster Protocol
//!
//! This module contains the protocol definitions for communicating with
//! the IR blaster peripheral: characteristic UUIDs, command frames and
//! response parsing. Everything here is pure.

use crate::domain::error::{DeviceError, FrameError};
use crate::domain::models::{LearnData, SensorData};
use anyhow::Result;
use tracing::trace;
use uuid::Uuid;

/// Data Write Characteristic UUID - where data commands are sent
pub const DATA_WRITE_UUID: &str = "d6c12804-95e7-11e6-ae22-56b6b6499611";

/// Data Notify Characteristic UUID - where data responses are received
pub const DATA_NOTIFY_UUID: &str = "d6c12805-95e7-11e6-ae22-56b6b6499611";

/// Control Write Characteristic UUID - where control bytes are sent
pub const CONTROL_WRITE_UUID: &str = "d6c12806-95e7-11e6-ae22-56b6b6499611";

/// Control Notify Characteristic UUID - where control notifications are received
pub const CONTROL_NOTIFY_UUID: &str = "d6c12807-95e7-11e6-ae22-56b6b6499611";

/// First byte of a temperature response on the data source
pub const TEMPERATURE_RESPONSE: u8 = 0x71;

/// Largest chunk the peripheral accepts in one write
pub const FRAME_SIZE: usize = 20;

/// Header bytes preceding an emitted payload
pub const EMIT_OVERHEAD: usize = 5;

/// The size byte of the emit header counts header plus payload.
pub const MAX_EMIT_PAYLOAD: usize = u8::MAX as usize - EMIT_OVERHEAD;

/// Temperature scale: 12-bit fixed point, 1/16 degree
const TEMPERATURE_STEP: f64 = 0.0625;

/// Device status byte values above this signal a device-side failure
const STATUS_FAILURE_THRESHOLD: u8 = 0x30;

/// Length byte values above this signal a payload
const PAYLOAD_THRESHOLD: u8 = 0x03;

/// Resolved UUIDs of the four characteristics used by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicMap {
    pub data_write: Uuid,
    pub data_notify: Uuid,
    pub control_write: Uuid,
    pub control_notify: Uuid,
}

impl Default for CharacteristicMap {
    fn default() -> Self {
        Self {
            data_write: Uuid::from_u128(0xd6c12804_95e7_11e6_ae22_56b6b6499611),
            data_notify: Uuid::from_u128(0xd6c12805_95e7_11e6_ae22_56b6b6499611),
            control_write: Uuid::from_u128(0xd6c12806_95e7_11e6_ae22_56b6b6499611),
            control_notify: Uuid::from_u128(0xd6c12807_95e7_11e6_ae22_56b6b6499611),
        }
    }
}

/// Fixed command frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Written to the control characteristic before every data command
    EnableNotify,
    /// Ask for a temperature reading
    QueryTemperature,
    /// Start capturing an audio/video remote
    LearnAv,
    /// Start capturing an air conditioner remote
    LearnAc,
}

impl DeviceCommand {
    /// Get the raw bytes for this command
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::EnableNotify => &[0x01],
            Self::QueryTemperature => &[0x45, 0x34, 0x71, 0x04, 0xEE],
            Self::LearnAv => &[0x45, 0x34, 0x24, 0x04, 0xA1],
            Self::LearnAc => &[0x45, 0x34, 0x27, 0x04, 0xA4],
        }
    }
}

fn require(frame: &[u8], needed: usize) -> std::result::Result<(), FrameError> {
    if frame.len() < needed {
        return Err(FrameError {
            needed,
            actual: frame.len(),
        });
    }
    Ok(())
}

/// Filter used for the temperature subscription.
pub fn is_temperature_response(frame: &[u8]) -> bool {
    frame.first() == Some(&TEMPERATURE_RESPONSE)
}

/// Byte 2 above 0x30 means the peripheral rejected the command.
pub fn is_device_failure(frame: &[u8]) -> std::result::Result<bool, FrameError> {
    require(frame, 3)?;
    Ok(frame[2] > STATUS_FAILURE_THRESHOLD)
}

fn has_payload(frame: &[u8]) -> bool {
    frame[1] > PAYLOAD_THRESHOLD
}

/// Parse a temperature response
///
/// # Response Structure
///
/// ```text
/// [0]   : 0x71
/// [1]   : Length, > 0x03 when a reading is present
/// [2]   : Status, > 0x30 on failure
/// [3]   : High nibble of the reading (low 4 bits)
/// [4]   : Low byte of the reading
/// ```
pub fn parse_temperature(frame: &[u8]) -> std::result::Result<SensorData, FrameError> {
    trace!("Temperature frame: {:02X?}", frame);

    if is_device_failure(frame)? {
        return Ok(SensorData::failed());
    }

    let mut data = SensorData {
        success: true,
        ..Default::default()
    };
    if has_payload(frame) {
        require(frame, 5)?;
        let raw = (u16::from(frame[3] & 0x0F) << 8) + u16::from(frame[4]);
        data.have_data = true;
        data.temperature = f64::from(raw) * TEMPERATURE_STEP;
    }
    Ok(data)
}

/// Parse the first data frame of a learn capture (status, length, payload start).
///
/// The captured payload starts at byte 3.
pub fn parse_learn_header(frame: &[u8]) -> std::result::Result<LearnData, FrameError> {
    trace!("Learn header frame: {:02X?}", frame);

    if is_device_failure(frame)? {
        return Ok(LearnData::failed());
    }

    let mut data = LearnData {
        success: true,
        ..Default::default()
    };
    if has_payload(frame) {
        data.have_data = true;
        data.data = hex::encode(&frame[3..]);
    }
    Ok(data)
}

/// Continuation frames carry payload bytes only.
pub fn append_learn_chunk(data: &mut LearnData, frame: &[u8]) {
    data.data.push_str(&hex::encode(frame));
}

/// Drop the trailing checksum byte from a reassembled capture.
pub fn strip_learn_checksum(data: &mut LearnData) {
    let keep = data.data.len().saturating_sub(2);
    data.data.truncate(keep);
}

/// Remaining packet count announced on the control source.
pub fn parse_packet_count(frame: &[u8]) -> std::result::Result<u8, FrameError> {
    require(frame, 1)?;
    Ok(frame[0])
}

/// Encoded emit command, ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitPlan {
    /// Single byte written to the control characteristic
    pub frame_count: u8,
    /// Data frames, each at most [`FRAME_SIZE`] bytes
    pub frames: Vec<Vec<u8>>,
    pub checksum: u8,
}

/// Encode a hex IR payload into emit frames.
pub fn encode_emit(ir_hex: &str) -> std::result::Result<EmitPlan, DeviceError> {
    let payload = hex::decode(ir_hex)?;
    encode_emit_bytes(&payload)
}

/// Encode raw IR bytes into emit frames
///
/// # Emit Stream Structure
///
/// ```text
/// [0-2]   : 0x45 0x34 0x25
/// [3]     : size = payload length + 5
/// [4]     : 0x81
/// [5..]   : payload
/// [last]  : checksum, sum of every preceding byte mod 256
/// ```
///
/// The stream is cut into 20-byte frames with no repeated header; the last
/// frame may be short.
pub fn encode_emit_bytes(payload: &[u8]) -> std::result::Result<EmitPlan, DeviceError> {
    if payload.len() > MAX_EMIT_PAYLOAD {
        return Err(DeviceError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_EMIT_PAYLOAD,
        });
    }

    let size = payload.len() + EMIT_OVERHEAD;
    let frame_count = (size + 1).div_ceil(FRAME_SIZE) as u8;

    let mut stream = Vec::with_capacity(size + 1);
    stream.extend_from_slice(&[0x45, 0x34, 0x25, size as u8, 0x81]);
    stream.extend_from_slice(payload);
    let checksum = stream.iter().fold(0u8, |sum, b| sum.wrapping_add(*b));
    stream.push(checksum);

    let frames = stream.chunks(FRAME_SIZE).map(<[u8]>::to_vec).collect();

    Ok(EmitPlan {
        frame_count,
        frames,
        checksum,
    })
}

/// Parse a UUID string
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| anyhow::anyhow!("Invalid UUID format {:?}: {}", uuid_str, e))
}

/// Parse a Bluetooth device address such as `AA:BB:CC:DD:EE:FF` into its 48-bit value
pub fn parse_bluetooth_address(address: &str) -> Result<u64> {
    let digits: String = address
        .trim()
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    if digits.len() != 12 {
        anyhow::bail!("Invalid Bluetooth address {:?}", address);
    }
    Ok(u64::from_str_radix(&digits, 16)?)
}
