//! Signaling relay over a shared mailbox.
//!
//! Payloads are written as entries addressed to a participant, watched by
//! that participant, and deleted once consumed.

mod memory;
mod relay;
pub mod remote;
mod store;

pub use memory::MemoryMailbox;
pub use relay::{SignalHandler, SignalingRelay};
pub use store::{ChangeReceiver, MailboxStore};

#[cfg(test)]
mod tests;
