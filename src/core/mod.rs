pub mod config;
pub mod crypto;
pub mod database;
pub mod endpoint;
pub mod pipeline;
pub mod probe;
pub mod sql;
pub mod terminal;
