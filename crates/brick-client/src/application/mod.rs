//! Application layer for the client.
//!
//! - **`events`** – The event bus.  Network results are published into named
//!   slots here, and UI, world and auth-flow code subscribe to the slots they
//!   need.  This is the only way the rest of the client hears from the
//!   network layer.

pub mod events;
