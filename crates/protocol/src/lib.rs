//! Wire types and convergence rules shared by the director, the streaming
//! nodes, and viewer clients.
//!
//! Everything here is serialization and pure logic; the crates that own
//! sockets and storage build on top of it.

mod manifest;
mod node;
mod state;
pub mod viewer;
mod wire;

pub use manifest::VideoManifest;
pub use node::NodeDescriptor;
pub use state::{now_ms, PlaybackState};
pub use wire::{ClientFrame, ServerFrame};
