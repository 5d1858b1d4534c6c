//! The BLE central's components, leaf-first.
//!
//! None of these types are thread-safe on their own: they are owned by the
//! [`Central`](crate::central::Central) actor, which is the only code that
//! mutates them. Each takes its ports by constructor injection.

pub mod connection;
pub mod device_registry;
pub mod notification_manager;
pub mod operation_queue;
pub mod scan_controller;
