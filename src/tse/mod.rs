//! TSE (fiscal signing device) module.
//!
//! Provides a trait-based backend framework for the German TSE transaction
//! protocol. Two backends implement the same contract: the device gateway
//! (HTTP to the physical device) and an in-memory simulator.

pub mod error;
pub mod gateway;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod transport;
pub mod validation;

pub use error::TseError;
pub use gateway::DeviceGateway;
pub use session::{SessionEngine, SessionState};
pub use simulator::{Simulator, UnknownTransactionPolicy};
pub use transport::{DeviceTransport, HttpTransport};
