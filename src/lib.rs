//! Signaling relay for peer-to-peer rooms that scales across processes.
//!
//! Room membership lives in a [`presence::PresenceStore`] and commands travel
//! over a [`bus::MessageBus`]; both have a single-process and a clustered
//! implementation. The [`gateway`] drives them from client events and
//! [`server`] carries those events over WebSocket.

pub mod bus;
pub mod config;
pub mod gateway;
pub mod identity;
pub mod presence;
pub mod server;
