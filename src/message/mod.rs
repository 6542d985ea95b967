//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send` and
//! `recv` operations for a given transport layer; an in-process channel
//! transport and a pure-Rust TCP transport are included. Messages are typed
//! `Envelope` values, and the `Mailbox` builds selective receives and the
//! tree-based collectives on top of the raw byte transport.

mod backoff;
pub mod comm;
pub mod envelope;
pub mod local;
pub mod mailbox;
pub mod tcp;
pub mod util;

pub use comm::Communicator;
pub use envelope::{Envelope, HaloMessage};
pub use local::LocalCommunicator;
pub use mailbox::{Mailbox, ReduceOp};
pub use tcp::{TcpCommunicator, TcpHost};
