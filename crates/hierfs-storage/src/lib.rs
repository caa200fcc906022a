#![warn(missing_docs)]

//! HierFS storage node: file bytes on a local directory, served to clients
//! and peers and managed by the naming node.

pub mod config;
pub mod node;
pub mod store;

pub use config::StorageConfig;
pub use node::{ClientEndpoint, CommandEndpoint, NodeError, StorageServer};
pub use store::LocalStore;
