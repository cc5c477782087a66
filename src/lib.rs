#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! tunnelpool — a concurrent manager of outbound encrypted transport
//! tunnels for a packet-forwarding daemon.
//!
//! The library exposes:
//! - `pool` — the tunnel state machine, selector, Activator, Reconnector,
//!   persistence, and the [`pool::TunnelPool`] control API that ties them
//!   together
//! - `transport` — the `Transport` contract the pool consumes, plus an
//!   in-memory mock used throughout the test suite
//! - `config` — TOML configuration loading with environment overrides
//! - `error` — the pool's caller-facing error type
//! - `http` — the unauthenticated render-list HTTP surface
//!
//! The binary (`tunnelpoold`, see `src/main.rs`) is the thin host process:
//! it loads configuration, initializes tracing, constructs a `TunnelPool`,
//! and serves the HTTP surface. It never makes transport, cryptographic, or
//! DNS decisions itself — those belong to whatever
//! `Transport` implementation the host application supplies.

pub mod config;
pub mod error;
pub mod http;
pub mod pool;
pub mod transport;

pub use config::Config;
pub use error::PoolError;
pub use pool::TunnelPool;
