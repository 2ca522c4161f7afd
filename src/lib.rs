pub mod auth;
pub mod config;
pub mod db;
pub mod enrich;
pub mod error;
pub mod gmail;
pub mod mailbox;
pub mod models;
pub mod ollama;
pub mod predicate;
pub mod prompts;
pub mod retention;
pub mod search;
pub mod signals;
pub mod sync;
pub mod tasks;

pub use error::{Error, Result};
