//! Shared error types for the experiment orchestration system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },

    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },

    #[error("Malformed job document: {message}")]
    MalformedDocument { message: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
