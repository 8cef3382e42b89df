pub mod atomic_writer;
pub mod metadata;
