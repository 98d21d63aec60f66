pub mod cache;
pub mod chain;
pub mod client;
pub mod detect;
pub mod engine;
pub mod model;
pub mod render;
pub mod session;

pub mod config;
