//! # Gridbus - Modbus TCP Client/Server Library
//!
//! An async Modbus TCP implementation in pure Rust, built on Tokio, for
//! industrial automation, building management, and smart grid systems. The
//! crate ships both sides of the wire: a client with a synchronous
//! request/response transaction engine and a concurrent server backed by a
//! thread-safe data store.
//!
//! ## Features
//!
//! - **Async I/O**: Tokio-based client and server, one task per connection
//! - **Strict framing**: MBAP codec that validates protocol id and length
//! - **Thread-safe data store**: snapshot reads, all-or-nothing writes
//! - **In-band exceptions**: malformed requests answered with Modbus
//!   exception responses, never a dropped connection
//! - **Validated configuration**: invalid host or unit id rejected at
//!   construction time
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client | Server |
//! |------|----------|--------|--------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridbus::{ModbusResult, ModbusTcpClient, ModbusTcpServer};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     // Serve the full 16-bit address space on an ephemeral port
//!     let mut server = ModbusTcpServer::bind("127.0.0.1:0").await?;
//!     let addr = server.local_addr();
//!     server.start()?;
//!
//!     let mut client =
//!         ModbusTcpClient::with_config(&addr.ip().to_string(), addr.port(), 1,
//!             std::time::Duration::from_secs(5))?;
//!     client.open().await?;
//!
//!     client.write_multiple_registers(0, &[0x1234, 0x5678]).await?;
//!     let values = client.read_holding_registers(0, 2).await?;
//!     println!("registers: {values:?}");
//!
//!     client.close().await;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on the official specification
pub mod constants;

/// Protocol definitions: function codes, exception codes, data packing
pub mod protocol;

/// MBAP frame codec for Modbus TCP
pub mod frame;

/// Thread-safe server-side data store
pub mod store;

/// Async Modbus TCP server
pub mod server;

/// Async Modbus TCP client
pub mod client;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use gridbus::tokio) ===
pub use tokio;

// === Core API ===
pub use client::ModbusTcpClient;
pub use server::{ModbusTcpServer, ShutdownHandle};
pub use store::DataStore;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use frame::TcpFrame;
pub use protocol::{ExceptionCode, ModbusFunction, UnitId};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    DEFAULT_TCP_PORT, MAX_PDU_SIZE, MAX_READ_BITS, MAX_READ_WORDS, MAX_UNIT_ID, MAX_WRITE_BITS,
    MAX_WRITE_WORDS,
};

/// Default per-call timeout
pub use client::DEFAULT_TIMEOUT;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
