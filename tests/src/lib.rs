//! # bitchat Test Suite
//!
//! Flows that need more than one crate, or more than one node.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Block log performance (criterion)
//! └── src/integration/
//!     ├── harness.rs    # In-process node with a scripted console
//!     ├── two_nodes.rs  # Dial, head request, message push
//!     └── block_sync.rs # Saving pushed records at their own index
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bc-tests
//! cargo test -p bc-tests integration::two_nodes
//! cargo bench -p bc-tests
//! ```

pub mod integration;
