//! Control plane - announcing volume pipes to providers.
//!
//! The pipe transport uses JSON over stdout for the rendezvous. After a
//! provider connects, all communication happens on the pipe.
//!
//! # Workflow
//!
//! 1. Host creates the volume and binds its pipe
//! 2. Host writes the [`Announcement`] line to stdout
//! 3. Provider connects to the announced pipe
//! 4. Request/response batches flow on the pipe

mod announce;
mod stdio;

pub use announce::{Announcement, PROTOCOL_VERSION};
pub use stdio::{write_line, write_stdout_line};
