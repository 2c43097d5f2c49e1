pub mod deck;
pub mod rules;
pub mod shared;

pub use deck::Deck;
pub use shared::*;
