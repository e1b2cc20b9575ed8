pub mod config;
pub mod error;
pub mod exchange;
pub mod http;
pub mod server;
pub mod tools;
