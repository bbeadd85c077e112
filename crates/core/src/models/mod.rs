//! Data models for estima

mod deck;
mod issue;
mod room;
mod round;
mod snapshot;
mod vote;

pub use deck::*;
pub use issue::*;
pub use room::*;
pub use round::*;
pub use snapshot::*;
pub use vote::*;
