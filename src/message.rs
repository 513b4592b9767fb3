use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::opcode;

/// Size of an encoded message on the wire.
pub const FRAME_LEN: usize = 9;

pub type RawFrame = [u8; FRAME_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    /// State-changing, echoed back to the sender.
    Set,
    /// Request/response.
    Get,
    /// Fire-and-forget notification.
    Send,
}

impl Category {
    /// Category selected by the top two bits of `command`; `None` for the reserved encoding.
    pub fn of(command: u16) -> Option<Self> {
        match command & opcode::CATEGORY_MASK {
            opcode::SET => Some(Category::Set),
            opcode::GET => Some(Category::Get),
            opcode::SEND => Some(Category::Send),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame too short: {0} bytes, expected 9")]
    TooShort(usize),
}

/// The wire envelope shared by both transports.
///
/// `address` is the destination node when travelling toward a node. Replies
/// rewrite it (see the routing engine). No field is validated: an unknown
/// `command` simply matches no table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    command: u16,
    address: u8,
    param: u16,
    payload: u32,
}

impl Message {
    pub const fn new(command: u16, address: u8) -> Self {
        Self { command, address, param: 0, payload: 0 }
    }

    pub const fn with_param(command: u16, address: u8, param: u16) -> Self {
        Self { command, address, param, payload: 0 }
    }

    pub const fn with_payload(command: u16, address: u8, param: u16, payload: u32) -> Self {
        Self { command, address, param, payload }
    }

    pub fn command(&self) -> u16 {
        self.command
    }

    pub fn category(&self) -> Option<Category> {
        Category::of(self.command)
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn param(&self) -> u16 {
        self.param
    }

    pub fn payload(&self) -> u32 {
        self.payload
    }

    /// Low byte of `param`.
    pub fn param_lo(&self) -> u8 {
        (self.param & 0xFF) as u8
    }

    /// High byte of `param`.
    pub fn param_hi(&self) -> u8 {
        (self.param >> 8) as u8
    }

    /// Nibble `index` of `param`, 0 being the least significant. Indices above 3 read as 0.
    pub fn param_nibble(&self, index: u8) -> u8 {
        if index > 3 {
            return 0;
        }
        ((self.param >> (index * 4)) & 0x0F) as u8
    }

    /// Payload reinterpreted as an IEEE-754 single. Bit pattern is preserved.
    pub fn payload_f32(&self) -> f32 {
        f32::from_bits(self.payload)
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    pub fn set_payload(&mut self, payload: u32) {
        self.payload = payload;
    }

    /// Stores `value` by bit pattern, never by numeric conversion.
    pub fn set_payload_f32(&mut self, value: f32) {
        self.payload = value.to_bits();
    }

    /// Little-endian `command(2) address(1) param(2) payload(4)`.
    pub fn encode(&self) -> RawFrame {
        let mut frame = [0u8; FRAME_LEN];
        frame[0..2].copy_from_slice(&self.command.to_le_bytes());
        frame[2] = self.address;
        frame[3..5].copy_from_slice(&self.param.to_le_bytes());
        frame[5..9].copy_from_slice(&self.payload.to_le_bytes());
        frame
    }

    /// Decodes the first [`FRAME_LEN`] bytes; trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < FRAME_LEN {
            return Err(DecodeError::TooShort(bytes.len()));
        }
        Ok(Self {
            command: u16::from_le_bytes([bytes[0], bytes[1]]),
            address: bytes[2],
            param: u16::from_le_bytes([bytes[3], bytes[4]]),
            payload: u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
        })
    }
}

impl core::fmt::Display for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match opcode::name(self.command) {
            Some(name) => write!(f, "{}", name)?,
            None => write!(f, "0x{:04X}", self.command)?,
        }
        write!(
            f,
            " @{} param=0x{:04X} payload=0x{:08X}",
            self.address, self.param, self.payload
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_command_bits() {
        assert_eq!(Category::of(opcode::LED), Some(Category::Set));
        assert_eq!(Category::of(opcode::PING), Some(Category::Get));
        assert_eq!(Category::of(opcode::INPUT_EVENT), Some(Category::Send));
        assert_eq!(Category::of(0x0012), None);
    }

    #[test]
    fn test_param_slicing() {
        let msg = Message::with_param(opcode::LED, 3, 0xA1B2);
        assert_eq!(msg.param_lo(), 0xB2);
        assert_eq!(msg.param_hi(), 0xA1);
        assert_eq!(msg.param_nibble(0), 0x2);
        assert_eq!(msg.param_nibble(1), 0xB);
        assert_eq!(msg.param_nibble(3), 0xA);
        assert_eq!(msg.param_nibble(4), 0);
    }

    #[test]
    fn test_float_payload_is_bit_exact() {
        let mut msg = Message::new(opcode::INTERNAL_TEMPERATURE, 1);
        msg.set_payload_f32(23.5);
        assert_eq!(msg.payload(), 23.5f32.to_bits());
        assert_eq!(msg.payload_f32(), 23.5);

        // NaN payloads keep their exact bits too
        msg.set_payload(0x7FC0_0001);
        assert_eq!(msg.payload_f32().to_bits(), 0x7FC0_0001);
    }

    #[test]
    fn test_frame_layout() {
        let msg = Message::with_payload(0x8002, 5, 0x0102, 0xDEAD_BEEF);
        let frame = msg.encode();
        assert_eq!(frame, [0x02, 0x80, 5, 0x02, 0x01, 0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(Message::decode(&frame), Ok(msg));
    }

    #[test]
    fn test_short_frame_rejected() {
        assert_eq!(Message::decode(&[1, 2, 3]), Err(DecodeError::TooShort(3)));
    }
}
