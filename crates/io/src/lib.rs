pub mod access_mode;
pub mod errors;
pub mod file_source;
pub mod memory_source;
pub mod page_window;
