//! Minimal live document tree for ripple.
//!
//! Models just enough of the rendered document for the call recorder to
//! forward mutations against and for the client replayer to apply
//! instruction trees to: an id-addressed node arena with binding labels,
//! ordered attributes, text content, and anchor resolution.

#![warn(missing_docs)]

pub mod document;

pub use document::{Document, DomError, Node, NodeId};
