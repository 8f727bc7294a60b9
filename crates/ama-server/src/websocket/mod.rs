//! Live room subscriptions: registry, broadcast, and per-connection sessions.

pub mod broadcast;
pub mod cancel;
pub mod connection;
pub mod registry;
pub mod session;

pub use broadcast::{Broadcaster, DeliveryReport};
pub use cancel::CancelSignal;
pub use connection::{ClientId, ConnectionHandle, SendError};
pub use registry::{SubscriberRegistry, Subscription};
pub use session::{run_room_session, EndReason, SessionConfig};
