//! Fifo side channel tests.

mod channel_test;
