//! Decksync - repository synchronization and manifest rendering for deployment projects

pub mod config;
pub mod db;
pub mod domain;
pub mod events;
pub mod jobs;
pub mod render;
pub mod repository;
pub mod sync;
pub mod value_schema;
