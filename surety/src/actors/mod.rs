pub mod engine;
pub mod relay;
#[cfg(feature = "rest")]
pub mod rest;
