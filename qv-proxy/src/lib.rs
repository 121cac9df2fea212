//! # qv-proxy: QuickView Rendezvous Relay
//!
//! Websocket service that pairs desktop agents with web viewers by an
//! opaque rendezvous id and bridges their traffic.
//!
//! TLS, when required, is terminated by a front proxy; the relay itself
//! listens on plain TCP on one or more addresses.

pub mod config;
pub mod service;
