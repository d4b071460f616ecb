//! Shared wire types for ripple live-update synchronization.
//!
//! This crate defines everything both ends of the live-update pipeline must
//! agree on: channel addressing, subscriber identity, the nested instruction
//! tree recorded during a scoped re-render, the transformation message that
//! carries it, and the fixed operation vocabulary the client replays.

#![warn(missing_docs)]

pub mod channel;
pub mod error;
pub mod fragment;
pub mod instruction;
pub mod message;
pub mod ops;

pub use channel::{Channel, SubscriberKey};
pub use error::WireError;
pub use fragment::Fragment;
pub use instruction::Instruction;
pub use message::{Anchor, ChangeKind, MutationEvent, TransformMessage};
pub use ops::{AttrCall, ClientOp, SectionCall};
