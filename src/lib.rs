//! Lanbeam library
//!
//! Serverless LAN sharing: UDP broadcast discovery plus a one-envelope
//! TCP protocol for files, folders, and short text/URL payloads.

pub mod config;
pub mod discovery;
pub mod engine;
pub mod events;
pub mod history;
pub mod listener;
pub mod logger;
pub mod protocol;
pub mod receiver;
pub mod sanitize;
pub mod sender;
pub mod session;
pub mod throughput;
pub mod wire;
