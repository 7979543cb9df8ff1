pub mod alert;
pub mod classify;
pub mod config;
pub mod detector;
pub mod diff;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod types;
pub mod validate;
