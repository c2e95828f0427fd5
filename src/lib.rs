//! Prometheus exporter for game servers based on the Source engine, built on
//! a pure Rust async implementation of the [Source RCON protocol](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol).
pub mod assembler;
pub mod client;
pub mod error;
pub mod games;
pub mod http;
pub mod metrics;
pub mod packet;
pub mod poll;
pub mod registry;
pub mod server;
