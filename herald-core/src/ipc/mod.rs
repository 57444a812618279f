//! Serializable types the engine publishes to its host.

pub mod events;
