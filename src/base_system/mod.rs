pub mod config;
pub mod context;
pub mod http;
pub mod logging;
