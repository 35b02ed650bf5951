//! Multi-node integration flows over loopback TCP.

pub mod block_sync;
#[cfg(test)]
pub mod harness;
pub mod two_nodes;
