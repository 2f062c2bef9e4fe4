pub mod backup;
pub mod classify;
pub mod clipboard;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod errors;
pub mod events;
pub mod hash;
pub mod logging;
pub mod monitor;
pub mod paste;
pub mod query;
pub mod storage;
