//! Bluetooth Module
//!
//! Drives the IR blaster over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    DeviceRegistry                        │
//! │        (address -> Session, created on first use)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Session + operations                    │
//! │  connect / discover / disconnect                         │
//! │  get_temperature / learn / emit_data                     │
//! └──────┬──────────────────┬───────────────────┬───────────┘
//!        │                  │                   │
//!        ▼                  ▼                   ▼
//! ┌────────────┐     ┌────────────┐      ┌───────────┐
//! │  Router    │     │ Transport  │      │ Protocol  │
//! │ data +     │◄────│ dial/write │      │ frames,   │
//! │ control    │     │ notify     │      │ parsing   │
//! └────────────┘     └────────────┘      └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, command frames, response parsing, emit encoding
//! - [`router`] - filtered notification subscriptions
//! - [`transport`] - the BLE stack boundary
//! - [`session`] - connection lifecycle
//! - [`operations`] - temperature, learn and emit
//! - [`registry`] - shared address-keyed session table

pub mod operations;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::DeviceRegistry;
pub use session::Session;
pub use transport::{BleTransport, GattLink};
