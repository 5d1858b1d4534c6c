//! # blelink-domain
//!
//! Pure domain model for the blelink BLE central.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error taxonomy, timestamps
//! - Define **device records** (what a scan has seen, keyed by address)
//! - Define the **GATT tree** snapshot (services, characteristics, CCCD)
//! - Define **operations** and the classification of their **outcomes**
//! - Define the **connection state** graph
//! - Compute **list edits** between two device snapshots
//! - Define **events** consumed by the application layer
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or an async runtime.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod address;
pub mod connection;
pub mod device;
pub mod event;
pub mod gatt;
pub mod list_diff;
pub mod operation;
