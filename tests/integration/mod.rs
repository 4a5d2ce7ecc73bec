//! Integration tests for decksync
//!
//! `sync` drives full repository updates against an in-memory database with
//! scripted parsers and renderers. `git` exercises the git2 backed parser on
//! repositories created in temporary directories.

mod git;
mod sync;
