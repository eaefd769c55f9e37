pub mod catalog;
pub mod config;
pub mod core;
pub mod data;
pub mod students;
