//! Domain models for Decksync

mod deck;
mod environment;
mod project;
mod sops;

pub use deck::*;
pub use environment::*;
pub use project::*;
pub use sops::*;
