//! # blelink-app
//!
//! Application layer: the BLE central core and its **port definitions**.
//!
//! ## Responsibilities
//! - Define the **driven port** [`Radio`](ports::Radio): fire-and-forget
//!   requests whose completions come back as [`RadioEvent`](ports::RadioEvent)s
//! - Define the [`EventPublisher`](ports::EventPublisher) port and an
//!   in-process broadcast [`event_bus`]
//! - Keep the **device registry** and the **scan session**
//! - Serialize GATT commands through the **operation queue**
//! - Drive one peripheral through the **connection state machine**
//! - Route value pushes through the **notification manager**
//! - Run all of the above on a single task: the [`central`] actor
//!
//! ## Dependency rule
//! Depends on `blelink-domain` only (plus `tokio` for channels and the actor
//! task). Never imports adapter crates. Adapters depend on *this* crate.

pub mod central;
pub mod config;
pub mod event_bus;
pub mod ports;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;
