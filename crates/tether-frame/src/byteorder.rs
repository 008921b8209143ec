//! 16-bit field conversion between the local byte order and a peer's.
//!
//! Peers never negotiate byte order. Each side writes header words in its
//! own order and the receiver works out the sender's order from the magic
//! word, which is always 1.

/// Byte order of a 16-bit wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the host.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub const fn opposite(self) -> Self {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }

    pub const fn is_big(self) -> bool {
        matches!(self, ByteOrder::Big)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::native()
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" => Ok(ByteOrder::Little),
            "big" | "be" => Ok(ByteOrder::Big),
            "native" => Ok(ByteOrder::native()),
            other => Err(format!("unknown byte order: {other}")),
        }
    }
}

/// Encode `value` in `order`.
pub fn encode_u16(order: ByteOrder, value: u16) -> [u8; 2] {
    match order {
        ByteOrder::Little => value.to_le_bytes(),
        ByteOrder::Big => value.to_be_bytes(),
    }
}

/// Decode a field that was written in `order`.
pub fn decode_u16(order: ByteOrder, bytes: [u8; 2]) -> u16 {
    match order {
        ByteOrder::Little => u16::from_le_bytes(bytes),
        ByteOrder::Big => u16::from_be_bytes(bytes),
    }
}

/// Work out the sender's byte order from a magic word.
///
/// `local` is the order the receiver reads in. Returns `None` when the word
/// is not 1 in either order.
pub fn detect_peer_order(local: ByteOrder, magic: [u8; 2]) -> Option<ByteOrder> {
    match decode_u16(local, magic) {
        0x0001 => Some(local),
        0x0100 => Some(local.opposite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_same_order() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let magic = encode_u16(order, 1);
            assert_eq!(detect_peer_order(order, magic), Some(order));
        }
    }

    #[test]
    fn detects_opposite_order() {
        let magic = encode_u16(ByteOrder::Big, 1);
        assert_eq!(
            detect_peer_order(ByteOrder::Little, magic),
            Some(ByteOrder::Big)
        );
        let magic = encode_u16(ByteOrder::Little, 1);
        assert_eq!(
            detect_peer_order(ByteOrder::Big, magic),
            Some(ByteOrder::Little)
        );
    }

    #[test]
    fn rejects_garbage_magic() {
        assert_eq!(detect_peer_order(ByteOrder::Little, [0x12, 0x34]), None);
        assert_eq!(detect_peer_order(ByteOrder::Big, [0x00, 0x00]), None);
    }

    #[test]
    fn cross_order_field_decoding() {
        let wire = encode_u16(ByteOrder::Big, 4090);
        assert_eq!(wire, [0x0F, 0xFA]);
        assert_eq!(decode_u16(ByteOrder::Big, wire), 4090);
        assert_eq!(decode_u16(ByteOrder::Little, wire), 0xFA0F);
    }

    #[test]
    fn parses_names() {
        assert_eq!("LE".parse::<ByteOrder>().unwrap(), ByteOrder::Little);
        assert_eq!("big".parse::<ByteOrder>().unwrap(), ByteOrder::Big);
        assert_eq!("native".parse::<ByteOrder>().unwrap(), ByteOrder::native());
        assert!("middle".parse::<ByteOrder>().is_err());
    }
}
