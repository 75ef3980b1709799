#![warn(rust_2018_idioms)]
//! A peer of the card game swarm: wires in, game views out.

pub mod keystore;
pub mod node;
pub mod settings;
pub mod sim;

pub use keystore::FileKeyStore;
pub use node::{Intent, Node, NodeHandle, NodeOptions, Stats, ViewEvent, ViewRx};
