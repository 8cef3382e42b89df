pub mod capture_source;
pub mod encoder;
