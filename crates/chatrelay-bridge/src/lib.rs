//! The relay proper: the control-channel connection manager and the router
//! that maps control messages onto automation actions and extraction events
//! back onto control messages.

pub mod conn;
pub mod router;

pub use conn::{ConnState, ConnectionManager};
pub use router::RelayRouter;
