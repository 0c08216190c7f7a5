//! Bidirectional forwarding: downstream requests up, upstream notifications
//! down.

pub mod notifications;
pub mod requests;

pub use notifications::NotificationForwarder;
pub use requests::{RequestForwarder, RouteTable};
