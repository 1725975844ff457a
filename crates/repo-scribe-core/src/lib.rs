//! # Repo Scribe Core
//!
//! Pure logic for repo-scribe: data models, the file-tree and outline
//! renderers, recovery of structured payloads from generation output,
//! markdown post-processing, and the store abstraction.
//!
//! This crate performs no network, process, or filesystem I/O and carries
//! no tokio or sqlx dependency. The application crate supplies the
//! collaborators that do.

pub mod extract;
pub mod file_tree;
pub mod markdown;
pub mod models;
pub mod outline;
pub mod plan;
pub mod store;
