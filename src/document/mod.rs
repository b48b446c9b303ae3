//! Document model.
//!
//! Every document is a JSON object carrying three system fields:
//! - `_key`: unique within its collection, immutable once assigned
//! - `_id`: `collection/_key`
//! - `_rev`: revision token, replaced on every mutation, never reused

mod document;
mod key;
mod revision;

pub use document::Document;
pub use key::{validate_key, KeyGenerator};
pub use revision::{Revision, RevisionGenerator};

use thiserror::Error;

use crate::errors::ErrorCode;

/// Errors raised by the document layer.
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    #[error("illegal document key: {0}")]
    IllegalKey(String),

    #[error("document key is immutable")]
    KeyImmutable,

    #[error("document body must be an object")]
    NotAnObject,
}

impl DocumentError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::DocumentKeyBad
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;
