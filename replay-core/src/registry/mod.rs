pub mod active_window;
pub mod source_registry;
