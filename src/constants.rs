//! Modbus protocol constants based on the official specification
//!
//! The size limits all derive from the 253-byte PDU ceiling the protocol
//! inherited from the serial line: a read-registers response carries
//! `1 (fc) + 1 (byte count) + 2N` bytes, a write-registers request carries
//! `1 + 2 + 2 + 1 + 2N`, and so on. The per-function count limits below are
//! the spec-defined values that keep every request and response inside that
//! ceiling.

/// MBAP header length, not counting the unit identifier
///
/// Transaction ID (2) + Protocol ID (2) + Length (2). The length field counts
/// the unit identifier and the PDU that follow the header.
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU (function code + payload) size
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum value of the MBAP length field: unit identifier + maximum PDU
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Maximum number of coils/discrete inputs per read request (FC01/FC02)
pub const MAX_READ_BITS: u16 = 2000;

/// Maximum number of registers per read request (FC03/FC04)
pub const MAX_READ_WORDS: u16 = 125;

/// Maximum number of coils per write request (FC15)
pub const MAX_WRITE_BITS: u16 = 1968;

/// Maximum number of registers per write request (FC16)
pub const MAX_WRITE_WORDS: u16 = 123;

/// Highest valid unit identifier; 248-255 are reserved by the specification
pub const MAX_UNIT_ID: u8 = 247;

/// Default Modbus TCP port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default cell count for each data store region (full 16-bit address space)
pub const DEFAULT_STORE_SIZE: usize = 0x10000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_limits_fit_pdu() {
        // FC03/FC04 response: fc + byte count + 2 bytes per register
        assert!(1 + 1 + 2 * MAX_READ_WORDS as usize <= MAX_PDU_SIZE);
        // FC01/FC02 response: fc + byte count + packed bits
        assert!(1 + 1 + (MAX_READ_BITS as usize).div_ceil(8) <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_write_limits_fit_pdu() {
        // FC16 request: fc + addr + quantity + byte count + 2 bytes per register
        assert!(1 + 2 + 2 + 1 + 2 * MAX_WRITE_WORDS as usize <= MAX_PDU_SIZE);
        // FC15 request: fc + addr + quantity + byte count + packed bits
        assert!(1 + 2 + 2 + 1 + (MAX_WRITE_BITS as usize).div_ceil(8) <= MAX_PDU_SIZE);
    }
}
