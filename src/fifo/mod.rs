//! Named-pipe side channel.
//!
//! External processes push newline-terminated UTF-8 messages into a fifo; the
//! channel watches the path and publishes each complete line as a
//! [`SupervisorEvent::FifoMessage`](crate::process::SupervisorEvent::FifoMessage).

mod channel;
mod error;

pub use channel::FifoChannel;
pub use error::FifoError;
