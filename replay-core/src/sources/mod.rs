pub mod virtual_backend;
