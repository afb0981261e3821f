pub mod activity;
pub mod config;
#[cfg(unix)]
pub mod server;
