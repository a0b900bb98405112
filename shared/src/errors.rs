//! Shared error types for the application pool system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Invalid process identifier: {input}")]
    InvalidGupid { input: String },

    #[error("Invalid group secret: {input}")]
    InvalidSecret { input: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
