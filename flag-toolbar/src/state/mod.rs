pub mod engine;
pub mod models;
pub mod resolution;
