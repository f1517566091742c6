//! Data Call Simulation Library
//!
//! This crate provides a simulation layer for running the data call engine
//! without radio hardware. It includes:
//!
//! - **VirtualModem**: Simulates the modem of one SIM slot, answering setup
//!   and teardown requests and raising indications on demand
//! - **run_virtual_modem_task**: Async task wrapping a virtual modem behind
//!   the same channels a real radio interface would use
//!
//! # Example
//!
//! ```rust
//! use dcm_protocol::{FailCause, ModemEvent, SetupFailure, SlotId};
//! use dcm_sim::VirtualModem;
//!
//! let mut modem = VirtualModem::new(SlotId(0));
//!
//! // Manipulate the modem
//! modem.set_power(true);
//! modem.fail_next("internet", SetupFailure::new(FailCause::NetworkCongestion));
//!
//! // Collect queued indications
//! while let Some(event) = modem.take_output() {
//!     assert!(matches!(event, ModemEvent::Indication(_)));
//! }
//! ```

pub mod modem;
pub mod task;

pub use modem::{SimError, VirtualModem, VirtualModemConfig};
pub use task::{run_virtual_modem_task, VirtualModemCommand};
