//! Modbus RTU master
//!
//! Reads holding registers (FC03) from slaves on a serial line.
//!
//! # Architecture
//!
//! ```text
//! RtuClient (request API)
//!     └── Session (task owning the line)
//!           ├── frame        request encoding / response decoding
//!           ├── crc          Modbus CRC-16
//!           ├── reassembly   fragmented reads -> candidate frames
//!           └── transaction  in-flight request, timeout, completion
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use rtu_master::{connect, RtuConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> rtu_master::Result<()> {
//! let config = RtuConfig::for_device("/dev/ttyUSB0").with_timeout(Duration::from_secs(1));
//! let client = connect(&config).await?;
//!
//! let reading = client.read(1).await?;
//! println!("registers: {:?}", reading.registers());
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod crc;
pub mod error;
pub mod frame;
pub mod logging;
pub mod reassembly;
pub mod session;
pub mod transaction;

pub use client::{connect, RtuClient};
pub use config::{load_config, Parity, RtuConfig};
pub use error::{Result, RtuError};
pub use frame::{
    encode_read_request, try_decode_response, DecodeOutcome, ReadRequest, ReadResponse,
    ResponseFrame,
};
pub use session::{Session, SessionState};
