//! Board, list and card models plus the in-memory board state store.

pub mod model;
pub mod store;

pub use model::{Board, Card, CardPatch, List, ListSnapshot};
pub use store::{BoardStore, StoreChange};
