//! Modbus TCP server
//!
//! [`ModbusTcpServer`] accepts any number of concurrent connections and runs
//! one task per peer: read a frame, dispatch by function code against the
//! shared [`DataStore`], write the response, repeat. A framing error or peer
//! disconnect tears down that one connection; the others and the store are
//! untouched.
//!
//! Two run modes are provided. [`serve`](ModbusTcpServer::serve) occupies the
//! calling task until a [`ShutdownHandle`] fires; [`start`](ModbusTcpServer::start)
//! spawns the accept loop in the background and returns as soon as the
//! listener is live, to be ended with [`stop`](ModbusTcpServer::stop). Grab a
//! handle with [`shutdown_handle`](ModbusTcpServer::shutdown_handle) before
//! awaiting `serve`, since the server itself is borrowed for the duration.
//!
//! ```rust,no_run
//! use gridbus::{DataStore, ModbusTcpServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> gridbus::ModbusResult<()> {
//!     let store = Arc::new(DataStore::new());
//!     let mut server = ModbusTcpServer::bind_with_store("0.0.0.0:502", store.clone()).await?;
//!     server.start()?;
//!     // ... feed input registers from the process, serve clients ...
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants::{MAX_READ_BITS, MAX_READ_WORDS, MAX_WRITE_BITS, MAX_WRITE_WORDS};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::TcpFrame;
use crate::protocol::{self, ExceptionCode, ModbusFunction};
use crate::store::DataStore;

/// Cloneable handle that signals a running server to shut down
///
/// Obtained from [`ModbusTcpServer::shutdown_handle`]; usable from any task,
/// which is the only way to end a blocking [`serve`](ModbusTcpServer::serve).
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Stop accepting and drop every open connection
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Modbus TCP server serving one shared [`DataStore`]
pub struct ModbusTcpServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    store: Arc<DataStore>,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
}

impl ModbusTcpServer {
    /// Bind a listener with a fresh, empty data store
    ///
    /// Port 0 binds an ephemeral port; see [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> ModbusResult<Self> {
        Self::bind_with_store(addr, Arc::new(DataStore::new())).await
    }

    /// Bind a listener serving an injected data store
    pub async fn bind_with_store(addr: &str, store: Arc<DataStore>) -> ModbusResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ModbusError::connection(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ModbusError::connection(format!("no local address: {e}")))?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            listener: Some(listener),
            local_addr,
            store,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            accept_handle: None,
        })
    }

    /// The bound listen address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared data store served to all connections
    pub fn data_store(&self) -> Arc<DataStore> {
        self.store.clone()
    }

    /// Whether the accept loop is live
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn take_listener(&mut self) -> ModbusResult<TcpListener> {
        self.listener
            .take()
            .ok_or_else(|| ModbusError::connection("server already started"))
    }

    /// A handle that can signal shutdown from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Run the accept loop on the calling task until a [`ShutdownHandle`] fires
    pub async fn serve(&mut self) -> ModbusResult<()> {
        let listener = self.take_listener()?;
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.running.store(true, Ordering::SeqCst);
        info!("modbus tcp server listening on {}", self.local_addr);
        Self::accept_loop(
            listener,
            self.store.clone(),
            self.shutdown_tx.clone(),
            shutdown_rx,
        )
        .await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Spawn the accept loop in the background and return immediately
    pub fn start(&mut self) -> ModbusResult<()> {
        let listener = self.take_listener()?;
        let shutdown_rx = self.shutdown_tx.subscribe();
        let store = self.store.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);
        info!("modbus tcp server listening on {}", self.local_addr);
        self.accept_handle = Some(tokio::spawn(async move {
            Self::accept_loop(listener, store, shutdown_tx, shutdown_rx).await;
            running.store(false, Ordering::SeqCst);
        }));
        Ok(())
    }

    /// Signal shutdown and wait for a background accept loop to finish
    ///
    /// Connection tasks receive the same signal and drop their sockets.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.await;
        }
        self.running.store(false, Ordering::SeqCst);
        info!("modbus tcp server on {} stopped", self.local_addr);
    }

    async fn accept_loop(
        listener: TcpListener,
        store: Arc<DataStore>,
        shutdown_tx: broadcast::Sender<()>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("accepted connection from {peer}");
                            let store = store.clone();
                            let shutdown_rx = shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                Self::handle_connection(stream, peer, store, shutdown_rx).await;
                            });
                        }
                        Err(e) => {
                            error!("accept failed: {e}");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("shutdown signal received, closing listener");
                    break;
                }
            }
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        peer: SocketAddr,
        store: Arc<DataStore>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            let frame = tokio::select! {
                result = TcpFrame::read_from(&mut stream) => result,
                _ = shutdown_rx.recv() => {
                    debug!("shutdown signal received, dropping {peer}");
                    break;
                }
            };

            let request = match frame {
                Ok(frame) => frame,
                Err(ModbusError::Connection { .. }) => {
                    debug!("client {peer} disconnected");
                    break;
                }
                Err(e) => {
                    warn!("closing {peer}: {e}");
                    break;
                }
            };

            // The transaction and unit identifiers are echoed verbatim.
            let pdu = process_pdu(&request.pdu, &store);
            let response = TcpFrame {
                transaction_id: request.transaction_id,
                unit_id: request.unit_id,
                pdu,
            };
            if let Err(e) = stream.write_all(&response.encode()).await {
                warn!("failed to write response to {peer}: {e}");
                break;
            }
        }
    }
}

fn exception_pdu(function: u8, code: ExceptionCode) -> Vec<u8> {
    vec![function | 0x80, code.to_u8()]
}

/// Dispatch one request PDU against the store and build the response PDU
///
/// Never fails: every error condition becomes an in-band exception PDU, so a
/// bad request can never take the connection down.
pub(crate) fn process_pdu(pdu: &[u8], store: &DataStore) -> Vec<u8> {
    // The framer guarantees a non-empty PDU, but keep the invariant local
    let Some(&fc) = pdu.first() else {
        return exception_pdu(0, ExceptionCode::IllegalDataValue);
    };
    let function = match ModbusFunction::from_u8(fc) {
        Ok(function) => function,
        Err(_) => {
            warn!("unsupported function code 0x{fc:02X}");
            return exception_pdu(fc, ExceptionCode::IllegalFunction);
        }
    };

    let result = match function {
        ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
            handle_read_bits(function, &pdu[1..], store)
        }
        ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
            handle_read_words(function, &pdu[1..], store)
        }
        ModbusFunction::WriteSingleCoil => handle_write_single_coil(&pdu[1..], store),
        ModbusFunction::WriteSingleRegister => handle_write_single_register(&pdu[1..], store),
        ModbusFunction::WriteMultipleCoils => handle_write_multiple_coils(&pdu[1..], store),
        ModbusFunction::WriteMultipleRegisters => handle_write_multiple_registers(&pdu[1..], store),
    };

    match result {
        Ok(response) => response,
        Err(code) => {
            debug!("{function} rejected: {code}");
            exception_pdu(fc, code)
        }
    }
}

fn parse_addr_word(payload: &[u8]) -> Result<(u16, u16), ExceptionCode> {
    if payload.len() < 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((
        u16::from_be_bytes([payload[0], payload[1]]),
        u16::from_be_bytes([payload[2], payload[3]]),
    ))
}

fn handle_read_bits(
    function: ModbusFunction,
    payload: &[u8],
    store: &DataStore,
) -> Result<Vec<u8>, ExceptionCode> {
    let (address, quantity) = parse_addr_word(payload)?;
    if quantity == 0 || quantity > MAX_READ_BITS {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let bits = match function {
        ModbusFunction::ReadCoils => store.read_coils(address, quantity)?,
        _ => store.read_discrete_inputs(address, quantity)?,
    };
    let packed = protocol::pack_bits(&bits);
    let mut response = vec![function.to_u8(), packed.len() as u8];
    response.extend_from_slice(&packed);
    Ok(response)
}

fn handle_read_words(
    function: ModbusFunction,
    payload: &[u8],
    store: &DataStore,
) -> Result<Vec<u8>, ExceptionCode> {
    let (address, quantity) = parse_addr_word(payload)?;
    if quantity == 0 || quantity > MAX_READ_WORDS {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let words = match function {
        ModbusFunction::ReadHoldingRegisters => store.read_holding_registers(address, quantity)?,
        _ => store.read_input_registers(address, quantity)?,
    };
    let mut response = vec![function.to_u8(), (words.len() * 2) as u8];
    response.extend_from_slice(&protocol::words_to_bytes(&words));
    Ok(response)
}

fn handle_write_single_coil(payload: &[u8], store: &DataStore) -> Result<Vec<u8>, ExceptionCode> {
    let (address, value) = parse_addr_word(payload)?;
    let bit = match value {
        0xFF00 => true,
        0x0000 => false,
        _ => return Err(ExceptionCode::IllegalDataValue),
    };
    store.write_coils(address, &[bit])?;
    // Echo of the request is the response
    let mut response = vec![ModbusFunction::WriteSingleCoil.to_u8()];
    response.extend_from_slice(&payload[..4]);
    Ok(response)
}

fn handle_write_single_register(
    payload: &[u8],
    store: &DataStore,
) -> Result<Vec<u8>, ExceptionCode> {
    let (address, value) = parse_addr_word(payload)?;
    store.write_holding_registers(address, &[value])?;
    let mut response = vec![ModbusFunction::WriteSingleRegister.to_u8()];
    response.extend_from_slice(&payload[..4]);
    Ok(response)
}

fn handle_write_multiple_coils(
    payload: &[u8],
    store: &DataStore,
) -> Result<Vec<u8>, ExceptionCode> {
    let (address, quantity) = parse_addr_word(payload)?;
    if quantity == 0 || quantity > MAX_WRITE_BITS {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let byte_count = (quantity as usize).div_ceil(8);
    if payload.len() < 5 || payload[4] as usize != byte_count || payload.len() < 5 + byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let bits = protocol::unpack_bits(&payload[5..5 + byte_count], quantity as usize);
    store.write_coils(address, &bits)?;

    let mut response = vec![ModbusFunction::WriteMultipleCoils.to_u8()];
    response.extend_from_slice(&address.to_be_bytes());
    response.extend_from_slice(&quantity.to_be_bytes());
    Ok(response)
}

fn handle_write_multiple_registers(
    payload: &[u8],
    store: &DataStore,
) -> Result<Vec<u8>, ExceptionCode> {
    let (address, quantity) = parse_addr_word(payload)?;
    if quantity == 0 || quantity > MAX_WRITE_WORDS {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let byte_count = quantity as usize * 2;
    if payload.len() < 5 || payload[4] as usize != byte_count || payload.len() < 5 + byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let words = protocol::bytes_to_words(&payload[5..5 + byte_count])
        .map_err(|_| ExceptionCode::IllegalDataValue)?;
    store.write_holding_registers(address, &words)?;

    let mut response = vec![ModbusFunction::WriteMultipleRegisters.to_u8()];
    response.extend_from_slice(&address.to_be_bytes());
    response.extend_from_slice(&quantity.to_be_bytes());
    Ok(response)
}
