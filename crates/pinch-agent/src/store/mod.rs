//! Local durable storage (§5). Connection state lives in a JSON file;
//! messages and the audit log share a single SQLite database through a
//! pooled connection handle, mirroring `pinch-relay`'s storage stack.

pub mod audit_store;
pub mod connection_store;
pub mod message_store;
