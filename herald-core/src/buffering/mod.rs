//! Audio containers and the pre-roll ring buffer.

pub mod chunk;
pub mod ring;

pub use chunk::{AudioChunk, CanonicalFrame};
pub use ring::RingBuffer;
