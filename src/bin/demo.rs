//! Gridbus Demo
//!
//! Demonstrates the gridbus library features including:
//! - Running a Modbus TCP server with a shared data store
//! - Client read/write operations across all four address spaces
//! - Exception handling and client-side request validation
//!
//! Usage: cargo run --bin demo

use std::time::Duration;

use std::sync::Arc;

use gridbus::{DataStore, ModbusError, ModbusTcpClient, ModbusTcpServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 Gridbus v{} Demo", gridbus::VERSION);
    println!("====================");
    println!("Modbus TCP client/server walkthrough\n");

    // =========================================================================
    // Part 1: Server setup
    // =========================================================================
    println!("🖥️  Part 1: Server Setup");
    println!("------------------------");

    // Full bit spaces, 1024 registers per word space
    let store = Arc::new(DataStore::with_sizes(0x10000, 0x10000, 1024, 1024));
    let mut server = ModbusTcpServer::bind_with_store("127.0.0.1:0", store.clone()).await?;
    let addr = server.local_addr();
    println!("  Listening on {addr}");

    // Seed the read-only spaces before accepting clients
    store.set_input_registers(0, &[220, 231, 228]).map_err(fail)?;
    store.set_discrete_inputs(0, &[true, false, true, true]).map_err(fail)?;
    println!("  Seeded input registers 0-2 and discrete inputs 0-3");

    server.start()?;
    println!("  ✅ Server running in the background");

    // =========================================================================
    // Part 2: Client connection
    // =========================================================================
    println!("\n🔌 Part 2: Client Connection");
    println!("----------------------------");

    let mut client = ModbusTcpClient::with_config(
        "127.0.0.1",
        addr.port(),
        1,
        Duration::from_secs(5),
    )?;
    client.set_debug(true);
    client.open().await?;
    println!("  ✅ Connected to {addr}");

    // =========================================================================
    // Part 3: Register operations
    // =========================================================================
    println!("\n📊 Part 3: Register Operations");
    println!("------------------------------");

    client.write_single_register(100, 0x1234).await?;
    println!("  FC06 Wrote register 100 = 0x1234");

    client.write_multiple_registers(200, &[10, 20, 30, 40]).await?;
    println!("  FC16 Wrote registers 200-203");

    let values = client.read_holding_registers(200, 4).await?;
    println!("  FC03 Holding registers 200-203: {values:?}");

    let inputs = client.read_input_registers(0, 3).await?;
    println!("  FC04 Input registers 0-2 (seeded): {inputs:?}");

    // =========================================================================
    // Part 4: Coil operations
    // =========================================================================
    println!("\n💡 Part 4: Coil Operations");
    println!("--------------------------");

    client.write_single_coil(0, true).await?;
    client.write_multiple_coils(1, &[false, true, true]).await?;
    let coils = client.read_coils(0, 4).await?;
    let states: Vec<&str> = coils.iter().map(|&c| if c { "ON" } else { "OFF" }).collect();
    println!("  FC01 Coils 0-3: {states:?}");

    let discretes = client.read_discrete_inputs(0, 4).await?;
    println!("  FC02 Discrete inputs 0-3 (seeded): {discretes:?}");

    // =========================================================================
    // Part 5: Error handling
    // =========================================================================
    println!("\n⚠️  Part 5: Error Handling");
    println!("--------------------------");

    // The server answers a read past its 1024-register extent with an
    // in-band exception
    match client.read_holding_registers(1020, 8).await {
        Ok(_) => {}
        Err(e) => println!("  Server exception: {e}"),
    }
    if let Some(code) = client.last_exception() {
        println!("  last_exception(): {code}");
    }

    // An oversize request never reaches the wire
    match client.read_holding_registers(0, 126).await {
        Ok(_) => {}
        Err(e) => println!("  Client-side rejection: {e}"),
    }

    client.close().await;
    server.stop().await;
    println!("\n🎉 Demo completed!");

    Ok(())
}

fn fail(code: gridbus::ExceptionCode) -> ModbusError {
    ModbusError::invalid_request(format!("store update failed: {code}"))
}
