pub mod artifact;
pub mod chunk;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod source;
pub mod state;
pub mod status;
