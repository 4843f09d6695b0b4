//! MBAP frame codec for Modbus TCP
//!
//! A Modbus TCP ADU is a 7-byte MBAP header (transaction id, protocol id,
//! length, unit id) followed by the PDU (function code + payload). The codec
//! here is pure and stateless; both the client and the server drive it.
//!
//! Decoding is stream-oriented: [`TcpFrame::read_from`] reads exactly one
//! frame from a byte stream, waiting for more bytes on partial reads rather
//! than failing. A frame is rejected with [`ModbusError::Frame`] when the
//! protocol identifier is non-zero or the declared length cannot hold a unit
//! identifier plus at least a function code, or exceeds the 254-byte maximum.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{MAX_MBAP_LENGTH, MAX_PDU_SIZE, MBAP_HEADER_LEN};
use crate::error::{ModbusError, ModbusResult};

/// One Modbus TCP application data unit
///
/// `pdu` holds the function code followed by the function-specific payload
/// and is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFrame {
    /// Transaction identifier, chosen by the client and echoed by the server
    pub transaction_id: u16,
    /// Unit identifier addressing a sub-device behind the server
    pub unit_id: u8,
    /// Function code + payload
    pub pdu: Vec<u8>,
}

impl TcpFrame {
    /// Create a frame, validating the PDU size
    pub fn new(transaction_id: u16, unit_id: u8, pdu: Vec<u8>) -> ModbusResult<Self> {
        if pdu.is_empty() {
            return Err(ModbusError::frame("PDU must carry a function code"));
        }
        if pdu.len() > MAX_PDU_SIZE {
            return Err(ModbusError::frame(format!(
                "PDU too large: {} bytes (max {})",
                pdu.len(),
                MAX_PDU_SIZE
            )));
        }
        Ok(Self {
            transaction_id,
            unit_id,
            pdu,
        })
    }

    /// The function code (first PDU byte), with the exception bit included
    pub fn function_code(&self) -> u8 {
        self.pdu[0]
    }

    /// Whether this frame is an exception response
    pub fn is_exception(&self) -> bool {
        self.function_code() & 0x80 != 0
    }

    /// The exception code byte, for exception responses that carry one
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.pdu.get(1).copied()
        } else {
            None
        }
    }

    /// The function-specific payload after the function code
    pub fn payload(&self) -> &[u8] {
        &self.pdu[1..]
    }

    /// Encode to wire bytes
    ///
    /// Protocol identifier is fixed at 0; the length field counts the unit
    /// identifier plus the PDU.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + self.pdu.len());
        buf.put_u16(self.transaction_id);
        buf.put_u16(0); // protocol identifier
        buf.put_u16((self.pdu.len() + 1) as u16);
        buf.put_u8(self.unit_id);
        buf.put_slice(&self.pdu);
        buf.freeze()
    }

    /// Read exactly one frame from a byte stream
    ///
    /// Blocks until a full frame is available. End of stream before the first
    /// header byte surfaces as [`ModbusError::Connection`] (orderly peer
    /// close); truncation inside a frame is a [`ModbusError::Frame`].
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> ModbusResult<Self> {
        let mut header = [0u8; MBAP_HEADER_LEN + 1];
        reader.read_exact(&mut header).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ModbusError::connection("connection closed by peer")
            } else {
                ModbusError::Io(e)
            }
        })?;

        let transaction_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let unit_id = header[6];

        if protocol_id != 0 {
            return Err(ModbusError::frame(format!(
                "unexpected protocol identifier 0x{protocol_id:04X}"
            )));
        }
        // Length counts unit id + PDU; the PDU needs at least a function code.
        if length < 2 || length > MAX_MBAP_LENGTH {
            return Err(ModbusError::frame(format!(
                "MBAP length {length} outside 2..={MAX_MBAP_LENGTH}"
            )));
        }

        let mut pdu = vec![0u8; length - 1];
        reader.read_exact(&mut pdu).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ModbusError::frame("stream truncated inside frame")
            } else {
                ModbusError::Io(e)
            }
        })?;

        Ok(Self {
            transaction_id,
            unit_id,
            pdu,
        })
    }
}

/// Format bytes as a spaced hex string for debug traces
pub(crate) fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        let frame = TcpFrame::new(0x1234, 0x11, vec![0x03, 0x00, 0x6B, 0x00, 0x03]).unwrap();
        let bytes = frame.encode();
        assert_eq!(
            &bytes[..],
            &[0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );
    }

    #[test]
    fn test_empty_pdu_rejected() {
        assert!(TcpFrame::new(1, 1, vec![]).is_err());
        assert!(TcpFrame::new(1, 1, vec![0u8; MAX_PDU_SIZE + 1]).is_err());
    }

    #[tokio::test]
    async fn test_decode_round_trip() {
        let frame = TcpFrame::new(7, 1, vec![0x01, 0x02, 0x00]).unwrap();
        let bytes = frame.encode();
        let mut reader: &[u8] = &bytes;
        let decoded = TcpFrame::read_from(&mut reader).await.unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_decode_two_frames_from_one_stream() {
        let a = TcpFrame::new(1, 1, vec![0x05, 0x00, 0x00, 0xFF, 0x00]).unwrap();
        let b = TcpFrame::new(2, 1, vec![0x85, 0x02]).unwrap();
        let mut stream = a.encode().to_vec();
        stream.extend_from_slice(&b.encode());
        let mut reader: &[u8] = &stream;
        assert_eq!(TcpFrame::read_from(&mut reader).await.unwrap(), a);
        let second = TcpFrame::read_from(&mut reader).await.unwrap();
        assert!(second.is_exception());
        assert_eq!(second.exception_code(), Some(0x02));
    }

    #[tokio::test]
    async fn test_decode_bad_protocol_id() {
        let bytes = [0x00, 0x01, 0xDE, 0xAD, 0x00, 0x02, 0x01, 0x03];
        let mut reader: &[u8] = &bytes;
        let err = TcpFrame::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_decode_bad_length() {
        // Declared length 0 cannot hold unit id + function code
        let zero = [0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x03];
        let mut reader: &[u8] = &zero;
        assert!(matches!(
            TcpFrame::read_from(&mut reader).await.unwrap_err(),
            ModbusError::Frame { .. }
        ));

        // Declared length above the 254 byte maximum
        let oversize = [0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x03];
        let mut reader: &[u8] = &oversize;
        assert!(matches!(
            TcpFrame::read_from(&mut reader).await.unwrap_err(),
            ModbusError::Frame { .. }
        ));
    }

    #[tokio::test]
    async fn test_decode_truncated_frame() {
        // Header promises 6 more bytes than the stream holds
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00];
        let mut reader: &[u8] = &bytes;
        assert!(matches!(
            TcpFrame::read_from(&mut reader).await.unwrap_err(),
            ModbusError::Frame { .. }
        ));
    }

    #[tokio::test]
    async fn test_clean_eof_is_connection_error() {
        let mut reader: &[u8] = &[];
        assert!(matches!(
            TcpFrame::read_from(&mut reader).await.unwrap_err(),
            ModbusError::Connection { .. }
        ));
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            transaction_id: u16,
            unit_id in 0u8..=247,
            pdu in proptest::collection::vec(any::<u8>(), 1..=MAX_PDU_SIZE),
        ) {
            let frame = TcpFrame::new(transaction_id, unit_id, pdu).unwrap();
            let bytes = frame.encode();
            // Header length field always equals unit id + PDU byte count
            let declared = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
            prop_assert_eq!(declared, frame.pdu.len() + 1);
            prop_assert_eq!(bytes.len(), MBAP_HEADER_LEN + declared);

            let decoded = tokio_test::block_on(async {
                let mut reader: &[u8] = &bytes;
                TcpFrame::read_from(&mut reader).await
            }).unwrap();
            prop_assert_eq!(decoded, frame);
        }
    }
}
