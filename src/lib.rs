pub mod artifact;
pub use artifact::*;

pub mod capture;
pub mod configuration;
pub mod error_handling;
pub mod pipeline;
pub mod preflight;
pub mod stats;
pub mod upload;
