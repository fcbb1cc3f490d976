//! The ndfs data node.
//!
//! A data node stores blocks on local disk, serves them over the data-plane
//! protocol, mirrors incoming writes down a replica chain, and keeps the
//! coordinator informed through a periodic control loop.
//!
//! - [`DataServer`]: accepts connections and runs one handler task per connection.
//! - [`ReplicationPusher`]: pushes a local block to another node on instruction.
//! - [`ControlLoop`]: heartbeats, block reports, received-block reports and
//!   command execution.
//! - [`ReceivedBlocks`]: the queue shared by write handlers and the control loop.
//! - [`DataNode`]: ties the above together.

mod control;
mod error;
mod node;
mod pusher;
mod read;
mod received;
mod server;
mod write_pipeline;

pub use control::{ControlConfig, ControlLoop};
pub use error::DataNodeError;
pub use node::{DataNode, DataNodeConfig};
pub use pusher::ReplicationPusher;
pub use received::ReceivedBlocks;
pub use server::{DataServer, NodeContext};
