pub mod after_script;
pub mod compression;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod restore;
pub mod rewriter;
pub mod signal;

pub use error::{Result, UpdateError};
