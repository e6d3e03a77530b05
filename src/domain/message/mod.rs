// Message domain module
// Durable point-to-point messages between named agents

#![allow(clippy::module_inception)]

pub mod message;

pub use message::Message;
