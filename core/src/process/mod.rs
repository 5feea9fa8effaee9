//! External process control: invocation with timeout and forced termination.
//!
//! `invoke` is the only place in the crate that spawns simulator processes.
//! `kill_all` is the blunt instrument used by `SimRunner::wait_completion`
//! when the caller opts into killing on timeout.

pub mod invoker;
pub mod kill;

pub use invoker::{invoke, OutputTarget};
pub use kill::kill_all;
