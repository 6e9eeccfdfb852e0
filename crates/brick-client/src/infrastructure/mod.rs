//! Infrastructure layer for the client application.
//!
//! Contains the OS-facing adapters: sockets, the network state machine, and
//! config file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `brick_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – Transports (UDP and in-memory), the connection state
//!   machine, the inbound dispatch loop, and the outbound send path.
//!
//! - **`storage`** – TOML configuration persistence with platform-specific
//!   paths.

pub mod network;
pub mod storage;
