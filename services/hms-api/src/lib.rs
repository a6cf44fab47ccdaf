//! Hospital management records API.
//!
//! A generic REST back-end: every resource (patients, bills, receipts, OPD
//! visits, master data, users) is an entry in the entity catalog and is served
//! by the same facade and handlers. Each record carries a human-readable
//! sequential business id (`P0001`, `BLD0042`) allocated from the ids
//! currently in use.

pub mod allocator;
pub mod api;
pub mod catalog;
pub mod config;
pub mod facade;
pub mod state;
pub mod store;
