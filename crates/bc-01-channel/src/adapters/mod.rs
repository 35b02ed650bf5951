//! Channel implementations.

pub mod console;
pub mod file;
pub mod socket;

pub use console::Console;
pub use file::{FileChannel, FileEndpoint};
pub use socket::SocketChannel;
