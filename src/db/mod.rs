//! Database module - SQLite with sqlx

mod decks;
mod deployments;
mod environments;
mod pool;
mod projects;
mod sops;

pub use decks::*;
pub use deployments::*;
pub use environments::*;
pub use pool::*;
pub use projects::*;
pub use sops::*;
