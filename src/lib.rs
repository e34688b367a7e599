pub mod cache;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod extractive;
pub mod generate;
pub mod level;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod prompt;
pub mod secrets;
pub mod store;
