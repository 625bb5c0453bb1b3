//! Real-time telemetry relay.
//!
//! One producer connection streams `frame` and `stats` messages; the relay
//! caches the latest of each and fans every message out to all other
//! connected viewers. Each module covers one responsibility:
//!
//! - [`message`] defines the JSON envelope, its codec and classification.
//! - [`cache`] keeps the most recent envelope per cacheable type.
//! - [`registry`] tracks live connections and the current producer.
//! - [`hub`] owns registry and cache behind one lock and runs fan-out.
//! - [`connection`] drives a single WebSocket from welcome to cleanup.
//! - [`server`] wires the hub into an axum router and serves the viewer page.
//! - [`mock`] is a synthetic producer for running without real hardware.
//! - [`cli`] and [`config`] parse the command line into runtime settings.
//!
//! Producer role is last-writer-wins: whichever connection most recently
//! sent a cacheable message is the producer. Two live producers will keep
//! taking the role from each other.

pub mod cache;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod message;
pub mod mock;
pub mod registry;
pub mod server;
pub mod telemetry;
