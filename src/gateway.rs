//! Connection gateway: turns client events into presence updates and bus
//! messages, and re-emits bus messages to locally attached connections

mod events;
mod relay;
mod session;

pub use events::{ClientEvent, Frame, OutboundMessage, ProtocolViolation};
pub use relay::Relay;
pub use session::{Session, SessionError, SessionState};
