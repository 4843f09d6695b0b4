//! Modbus TCP client
//!
//! [`ModbusTcpClient`] owns one TCP connection and runs a strict synchronous
//! request/response discipline: each call sends one frame, then reads frames
//! until the one bearing the matching transaction identifier arrives (stale
//! frames are discarded), or the configured deadline elapses. A timeout is a
//! normal outcome and leaves the connection open for the next call; the
//! client never reconnects on its own.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use gridbus::{ModbusResult, ModbusTcpClient};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut client = ModbusTcpClient::new("192.168.1.10")?;
//!     client.open().await?;
//!
//!     client.write_single_register(0, 0x1234).await?;
//!     let values = client.read_holding_registers(0, 10).await?;
//!     println!("registers: {values:?}");
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::constants::{
    DEFAULT_TCP_PORT, MAX_READ_BITS, MAX_READ_WORDS, MAX_UNIT_ID, MAX_WRITE_BITS, MAX_WRITE_WORDS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{hex_dump, TcpFrame};
use crate::protocol::{self, ExceptionCode, ModbusFunction, UnitId};

/// Default per-call deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether `host` is an IPv4 literal, IPv6 literal, or syntactically valid DNS name
fn is_valid_host(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    if host.parse::<Ipv4Addr>().is_ok() || host.parse::<Ipv6Addr>().is_ok() {
        return true;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Modbus TCP client with a single connection and one outstanding transaction
#[derive(Debug)]
pub struct ModbusTcpClient {
    host: String,
    port: u16,
    unit_id: UnitId,
    timeout: Duration,
    debug: bool,
    stream: Option<TcpStream>,
    transaction_id: u16,
    last_exception: Option<ExceptionCode>,
}

impl ModbusTcpClient {
    /// Create a client with defaults: port 502, unit id 1, 5 s timeout
    ///
    /// An invalid host is a hard configuration error; a misconfigured client
    /// is never constructed.
    pub fn new(host: &str) -> ModbusResult<Self> {
        Self::with_config(host, DEFAULT_TCP_PORT, 1, DEFAULT_TIMEOUT)
    }

    /// Create a client with explicit port, unit id and timeout
    pub fn with_config(
        host: &str,
        port: u16,
        unit_id: UnitId,
        response_timeout: Duration,
    ) -> ModbusResult<Self> {
        if !is_valid_host(host) {
            return Err(ModbusError::configuration(format!("invalid host {host:?}")));
        }
        if unit_id > MAX_UNIT_ID {
            return Err(ModbusError::configuration(format!(
                "unit id {unit_id} above {MAX_UNIT_ID}"
            )));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            unit_id,
            timeout: response_timeout,
            debug: false,
            stream: None,
            transaction_id: 1,
            last_exception: None,
        })
    }

    // ===== Configuration accessors =====

    /// The configured host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Set the host; rejects invalid values, leaving the previous one in place
    pub fn set_host(&mut self, host: &str) -> ModbusResult<()> {
        if !is_valid_host(host) {
            return Err(ModbusError::configuration(format!("invalid host {host:?}")));
        }
        self.host = host.to_string();
        Ok(())
    }

    /// The configured TCP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Set the TCP port
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// The configured unit identifier
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Set the unit identifier; values above 247 are reserved and rejected
    pub fn set_unit_id(&mut self, unit_id: UnitId) -> ModbusResult<()> {
        if unit_id > MAX_UNIT_ID {
            return Err(ModbusError::configuration(format!(
                "unit id {unit_id} above {MAX_UNIT_ID}"
            )));
        }
        self.unit_id = unit_id;
        Ok(())
    }

    /// The per-call response deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the per-call response deadline
    pub fn set_timeout(&mut self, response_timeout: Duration) {
        self.timeout = response_timeout;
    }

    /// Whether per-frame debug traces are emitted
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Toggle per-frame debug traces; never affects protocol behavior
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// The exception code from the most recent call, if the server reported one
    pub fn last_exception(&self) -> Option<ExceptionCode> {
        self.last_exception
    }

    // ===== Connection management =====

    /// Open the connection to the configured host and port
    pub async fn open(&mut self) -> ModbusResult<()> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = timeout(self.timeout, connect)
            .await
            .map_err(|_| ModbusError::timeout("connect", self.timeout.as_millis() as u64))?
            .map_err(|e| {
                ModbusError::connection(format!(
                    "failed to connect to {}:{}: {e}",
                    self.host, self.port
                ))
            })?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        debug!("connected to {}:{}", self.host, self.port);
        Ok(())
    }

    /// Close the connection; a no-op when already closed
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    /// Whether the connection is open
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    // ===== Read operations =====

    /// Read coils (FC01); quantity 1-2000
    pub async fn read_coils(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        validate_read(address, quantity, MAX_READ_BITS)?;
        let pdu = read_pdu(ModbusFunction::ReadCoils, address, quantity);
        let response = self.transaction(pdu).await?;
        parse_bit_payload(response.payload(), quantity)
    }

    /// Read discrete inputs (FC02); quantity 1-2000
    pub async fn read_discrete_inputs(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        validate_read(address, quantity, MAX_READ_BITS)?;
        let pdu = read_pdu(ModbusFunction::ReadDiscreteInputs, address, quantity);
        let response = self.transaction(pdu).await?;
        parse_bit_payload(response.payload(), quantity)
    }

    /// Read holding registers (FC03); quantity 1-125
    pub async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        validate_read(address, quantity, MAX_READ_WORDS)?;
        let pdu = read_pdu(ModbusFunction::ReadHoldingRegisters, address, quantity);
        let response = self.transaction(pdu).await?;
        parse_word_payload(response.payload(), quantity)
    }

    /// Read input registers (FC04); quantity 1-125
    pub async fn read_input_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        validate_read(address, quantity, MAX_READ_WORDS)?;
        let pdu = read_pdu(ModbusFunction::ReadInputRegisters, address, quantity);
        let response = self.transaction(pdu).await?;
        parse_word_payload(response.payload(), quantity)
    }

    // ===== Write operations =====

    /// Write a single coil (FC05)
    pub async fn write_single_coil(&mut self, address: u16, value: bool) -> ModbusResult<()> {
        let mut pdu = vec![ModbusFunction::WriteSingleCoil.to_u8()];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(if value { &[0xFF, 0x00] } else { &[0x00, 0x00] });
        self.transaction(pdu).await?;
        Ok(())
    }

    /// Write a single holding register (FC06)
    pub async fn write_single_register(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        let mut pdu = vec![ModbusFunction::WriteSingleRegister.to_u8()];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&value.to_be_bytes());
        self.transaction(pdu).await?;
        Ok(())
    }

    /// Write multiple coils (FC15); 1-1968 values
    pub async fn write_multiple_coils(
        &mut self,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<()> {
        validate_write(address, values.len(), MAX_WRITE_BITS)?;
        let packed = protocol::pack_bits(values);
        let mut pdu = vec![ModbusFunction::WriteMultipleCoils.to_u8()];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
        pdu.push(packed.len() as u8);
        pdu.extend_from_slice(&packed);
        self.transaction(pdu).await?;
        Ok(())
    }

    /// Write multiple holding registers (FC16); 1-123 values
    pub async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        validate_write(address, values.len(), MAX_WRITE_WORDS)?;
        let mut pdu = vec![ModbusFunction::WriteMultipleRegisters.to_u8()];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
        pdu.push((values.len() * 2) as u8);
        pdu.extend_from_slice(&protocol::words_to_bytes(values));
        self.transaction(pdu).await?;
        Ok(())
    }

    // ===== Transaction engine =====

    /// Run one request/response exchange
    ///
    /// Allocates the next transaction identifier, sends the frame, then reads
    /// frames until one with a matching identifier arrives. Stale frames are
    /// discarded. The whole exchange is bounded by the configured timeout; on
    /// timeout the connection is kept for the next call, while a framing or
    /// socket error drops it since the stream can no longer be trusted.
    async fn transaction(&mut self, request_pdu: Vec<u8>) -> ModbusResult<TcpFrame> {
        self.last_exception = None;

        let transaction_id = self.transaction_id;
        self.transaction_id = self.transaction_id.wrapping_add(1);

        let unit_id = self.unit_id;
        let request = TcpFrame::new(transaction_id, unit_id, request_pdu)?;
        let request_fc = request.function_code();
        let bytes = request.encode();
        let trace = self.debug;
        let deadline = self.timeout;

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("connection is not open"))?;

        if trace {
            debug!("tx: {}", hex_dump(&bytes));
        }

        let exchange = async {
            stream.write_all(&bytes).await?;
            loop {
                let response = TcpFrame::read_from(stream).await?;
                if trace {
                    debug!("rx: {}", hex_dump(&response.encode()));
                }
                if response.transaction_id != transaction_id || response.unit_id != unit_id {
                    debug!(
                        "discarding frame with transaction id {} unit {} (expected {} unit {})",
                        response.transaction_id, response.unit_id, transaction_id, unit_id
                    );
                    continue;
                }
                return Ok::<TcpFrame, ModbusError>(response);
            }
        };

        let result = match timeout(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ModbusError::timeout(
                "response wait",
                deadline.as_millis() as u64,
            )),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if !e.is_timeout() {
                    self.stream = None;
                }
                return Err(e);
            }
        };

        if response.is_exception() {
            let code = response
                .exception_code()
                .and_then(ExceptionCode::from_u8)
                .unwrap_or(ExceptionCode::ServerDeviceFailure);
            self.last_exception = Some(code);
            return Err(ModbusError::exception(response.function_code(), code));
        }
        if response.function_code() != request_fc {
            self.stream = None;
            return Err(ModbusError::frame(format!(
                "response function 0x{:02X} does not match request 0x{request_fc:02X}",
                response.function_code()
            )));
        }
        Ok(response)
    }
}

fn read_pdu(function: ModbusFunction, address: u16, quantity: u16) -> Vec<u8> {
    let mut pdu = vec![function.to_u8()];
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    pdu
}

/// Pre-send validation for read requests; a violation sends no frame
fn validate_read(address: u16, quantity: u16, max: u16) -> ModbusResult<()> {
    if quantity == 0 || quantity > max {
        return Err(ModbusError::invalid_request(format!(
            "read quantity {quantity} outside 1..={max}"
        )));
    }
    if address as u32 + quantity as u32 > 0x1_0000 {
        return Err(ModbusError::invalid_request(format!(
            "range {address}+{quantity} exceeds the 16-bit address space"
        )));
    }
    Ok(())
}

/// Pre-send validation for multi-value write requests
fn validate_write(address: u16, count: usize, max: u16) -> ModbusResult<()> {
    if count == 0 || count > max as usize {
        return Err(ModbusError::invalid_request(format!(
            "write count {count} outside 1..={max}"
        )));
    }
    if address as usize + count > 0x1_0000 {
        return Err(ModbusError::invalid_request(format!(
            "range {address}+{count} exceeds the 16-bit address space"
        )));
    }
    Ok(())
}

fn parse_bit_payload(payload: &[u8], quantity: u16) -> ModbusResult<Vec<bool>> {
    let expected = (quantity as usize).div_ceil(8);
    match payload.first() {
        Some(&byte_count) if byte_count as usize == expected => {}
        other => {
            return Err(ModbusError::frame(format!(
                "bad bit response byte count {other:?}, expected {expected}"
            )));
        }
    }
    if payload.len() < 1 + expected {
        return Err(ModbusError::frame("bit response shorter than byte count"));
    }
    Ok(protocol::unpack_bits(
        &payload[1..1 + expected],
        quantity as usize,
    ))
}

fn parse_word_payload(payload: &[u8], quantity: u16) -> ModbusResult<Vec<u16>> {
    let expected = quantity as usize * 2;
    match payload.first() {
        Some(&byte_count) if byte_count as usize == expected => {}
        other => {
            return Err(ModbusError::frame(format!(
                "bad register response byte count {other:?}, expected {expected}"
            )));
        }
    }
    if payload.len() < 1 + expected {
        return Err(ModbusError::frame(
            "register response shorter than byte count",
        ));
    }
    protocol::bytes_to_words(&payload[1..1 + expected])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_validation() {
        assert!(is_valid_host("localhost"));
        assert!(is_valid_host("my.good.host"));
        assert!(is_valid_host("127.0.0.1"));
        assert!(is_valid_host("::1"));
        assert!(!is_valid_host("wrong@host"));
        assert!(!is_valid_host(""));
        assert!(!is_valid_host("-leading.hyphen"));
        assert!(!is_valid_host("under_score.example"));
    }

    #[test]
    fn test_construction_validation() {
        assert!(matches!(
            ModbusTcpClient::new("wrong@host").unwrap_err(),
            ModbusError::Configuration { .. }
        ));
        assert!(matches!(
            ModbusTcpClient::with_config("localhost", 502, 250, DEFAULT_TIMEOUT).unwrap_err(),
            ModbusError::Configuration { .. }
        ));
        assert!(ModbusTcpClient::with_config("localhost", 502, 247, DEFAULT_TIMEOUT).is_ok());
    }

    #[test]
    fn test_defaults() {
        let client = ModbusTcpClient::new("localhost").unwrap();
        assert_eq!(client.host(), "localhost");
        assert_eq!(client.port(), 502);
        assert_eq!(client.unit_id(), 1);
        assert!(!client.debug());
        assert!(!client.is_open());
        assert_eq!(client.last_exception(), None);
    }

    #[test]
    fn test_setters_keep_old_value_on_rejection() {
        let mut client = ModbusTcpClient::new("localhost").unwrap();

        assert!(client.set_host("wrong@host").is_err());
        assert_eq!(client.host(), "localhost");
        client.set_host("my.good.host").unwrap();
        assert_eq!(client.host(), "my.good.host");

        assert!(client.set_unit_id(248).is_err());
        assert_eq!(client.unit_id(), 1);
        client.set_unit_id(42).unwrap();
        assert_eq!(client.unit_id(), 42);

        client.set_port(42);
        assert_eq!(client.port(), 42);
    }

    #[tokio::test]
    async fn test_presend_validation_needs_no_connection() {
        // Validation fires before the connection check, so no frame and no
        // socket is ever involved.
        let mut client = ModbusTcpClient::new("localhost").unwrap();

        let err = client.read_holding_registers(0, 126).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidRequest { .. }), "{err}");

        let err = client
            .write_multiple_registers(0, &[0u16; 124])
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidRequest { .. }), "{err}");

        let err = client
            .write_multiple_coils(0, &vec![false; 1969])
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidRequest { .. }), "{err}");

        // In-range request against a closed connection is a connection error
        let err = client.read_coils(0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }), "{err}");
    }

    #[test]
    fn test_address_span_validation() {
        assert!(validate_read(0xFFFF, 1, MAX_READ_WORDS).is_ok());
        assert!(validate_read(0xFFFF, 2, MAX_READ_WORDS).is_err());
        assert!(validate_write(0xFF80, 128, MAX_WRITE_BITS).is_ok());
        assert!(validate_write(0xFF80, 129, MAX_WRITE_BITS).is_err());
    }

    #[test]
    fn test_parse_bit_payload() {
        let bits = parse_bit_payload(&[0x01, 0b0000_0101], 3).unwrap();
        assert_eq!(bits, vec![true, false, true]);

        // Byte count must match the requested quantity
        assert!(parse_bit_payload(&[0x02, 0x05, 0x00], 3).is_err());
        assert!(parse_bit_payload(&[], 3).is_err());
    }

    #[test]
    fn test_parse_word_payload() {
        let words = parse_word_payload(&[0x04, 0x12, 0x34, 0xAB, 0xCD], 2).unwrap();
        assert_eq!(words, vec![0x1234, 0xABCD]);

        assert!(parse_word_payload(&[0x04, 0x12, 0x34], 2).is_err());
        assert!(parse_word_payload(&[0x02, 0x12, 0x34], 2).is_err());
    }
}
