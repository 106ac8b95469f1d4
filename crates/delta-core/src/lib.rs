pub mod arena;
pub mod binary_data;
pub mod config;
pub mod document;
pub mod errors;
pub mod repository;
mod save;
pub mod segment;
mod segments_map;
pub mod stream;
mod window;
