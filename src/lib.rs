pub mod commands;
pub mod config;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod proxy;
pub mod server;
pub mod transcript;
