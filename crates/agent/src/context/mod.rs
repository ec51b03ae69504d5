//! Prompt context assembled from memory.

pub mod block;

pub use block::{ContextBlock, ContextSettings};
