mod buffer;
pub mod memory;

pub use buffer::{BufferInfo, OwnedBuffer};
