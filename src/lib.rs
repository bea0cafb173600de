//! Small POS TSE client
//!
//! Session manager for the German fiscal signing device (TSE). A `TseClient`
//! drives the administrative bring-up (`fast_init`) and the signed
//! transaction lifecycle against either the physical device over HTTP or an
//! in-memory simulator with the same contract.
//!
//! ```no_run
//! use small_pos_tse::{TseClient, TseConfig};
//! use small_pos_tse::tse::protocol::{StartTransactionRequest, TransactionRequest};
//!
//! # async fn run() -> Result<(), small_pos_tse::TseError> {
//! let client = TseClient::new(&TseConfig::device("192.168.10.74:5000")?)?;
//! let n = client
//!     .start_transaction(
//!         &StartTransactionRequest::new("POS-1")
//!             .with_data(serde_json::json!({"receipt": "R-1001"})),
//!     )
//!     .await?
//!     .transaction_number();
//! let record = client
//!     .finish_transaction(&TransactionRequest::new("POS-1", n))
//!     .await?;
//! println!("signature counter {}", record.signature_counter);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod logging;
pub mod tse;

pub use client::TseClient;
pub use config::{BackendKind, TseConfig};
pub use logging::{init_logging, LoggingConfig};
pub use tse::error::TseError;
pub use tse::protocol::{LogRecord, ProtocolVariant, TransactionStart};
pub use tse::session::SessionState;
