use crate::{ObjectId, Opcode};

/// Size of the header that precedes every message on the wire
pub const HEADER_SIZE: usize = 8;

/// The header of a wayland message. The second word of the header holds the message size (including
/// the header) in the upper 16 bits and the opcode in the lower 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub object_id: ObjectId,
    pub size: u16,
    pub opcode: Opcode,
}

impl MessageHeader {
    /// Reads a header from the start of `buffer`. Returns `None` if not enough bytes are available.
    pub fn read(buffer: &[u8]) -> Option<Self> {
        let object_id = u32::from_ne_bytes(buffer.get(0..4)?.try_into().ok()?);
        let size_and_opcode = u32::from_ne_bytes(buffer.get(4..8)?.try_into().ok()?);
        Some(Self {
            object_id,
            size: (size_and_opcode >> 16) as u16,
            opcode: (size_and_opcode & 0xFFFF) as Opcode,
        })
    }

    /// Whether the size announced by the header can belong to a well formed message
    pub fn has_valid_size(&self) -> bool {
        let size = self.size as usize;
        size >= HEADER_SIZE && size % 4 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_splits_size_and_opcode() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&7u32.to_ne_bytes());
        buffer.extend_from_slice(&((12u32 << 16) | 1).to_ne_bytes());

        let header = MessageHeader::read(&buffer).unwrap();
        assert_eq!(
            header,
            MessageHeader {
                object_id: 7,
                size: 12,
                opcode: 1,
            }
        );
        assert!(header.has_valid_size());
    }

    #[test]
    fn read_needs_a_full_header() {
        assert!(MessageHeader::read(&[0; HEADER_SIZE - 1]).is_none());
    }

    #[test]
    fn undersized_or_unaligned_messages_are_invalid() {
        let header = |size| MessageHeader {
            object_id: 1,
            size,
            opcode: 0,
        };
        assert!(!header(4).has_valid_size());
        assert!(!header(10).has_valid_size());
        assert!(header(8).has_valid_size());
    }
}
