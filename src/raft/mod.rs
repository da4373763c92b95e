//! Leader election and log replication, written as a sans-IO state machine:
//! callers feed it events and execute the side effects it returns.

pub mod api;
pub mod state;
