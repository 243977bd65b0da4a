//! # pubsub-protocol
//!
//! PubSub network message structures.
//!
//! This crate defines what a publisher hands to the transport layer each tick.
//! Turning these structures into bytes (UADP, JSON) is left to the transport.

pub mod messages;

pub use messages::*;
