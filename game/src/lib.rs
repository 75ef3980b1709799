#![warn(rust_2018_idioms)]
//! Rules and messages of the card game: what the leader runs and what every
//! client sees.

pub mod client;
pub mod deck;
pub mod model;
pub mod protocol;
pub mod server;

pub use client::RoundView;
pub use model::{Catalog, CatalogError, ClientId};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{GameServer, Outbound};
