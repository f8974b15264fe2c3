// Adapters layer: concrete implementations of the domain ports.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
