//! Cmd Supervisor - run one shell command at a time with streamed output,
//! progress ticks, job control and a named-pipe side channel.

pub mod config;
pub mod display;
pub mod fifo;
pub mod process;
