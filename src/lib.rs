//! Weir: a decentralized information-flow-control policy service.
//!
//! Applications create secrecy tags, processes carry labels made of tags,
//! and Weir decides which label changes are authorized, which storage
//! partition a labeled process sees, and whether labeled data may leave
//! the device for a given address.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod kernel;
pub mod label;
pub mod logging;
pub mod server;
pub mod types;
