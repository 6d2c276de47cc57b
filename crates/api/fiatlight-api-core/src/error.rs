//! Error kinds shared by every fiatlight crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::EnvelopeState;

/// Coarse classification used by last-exception records and error banners.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    BadInput,
    TypeMismatch,
    RuntimeFailure,
    CompileFailure,
    LinkIllegal,
    PersistFailure,
    BadState,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FiatError {
    /// A validator rejected a value; the pin becomes Invalid.
    #[error("bad input: {0}")]
    BadInput(String),
    /// A returned value does not match the declared output type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// The user callable failed.
    #[error("{0}")]
    RuntimeFailure(String),
    /// The registry or the signature compiler could not build a handle.
    #[error("cannot build gui: {0}")]
    CompileFailure(String),
    #[error("illegal link: {0}")]
    LinkIllegal(String),
    #[error("persistence failure: {0}")]
    PersistFailure(String),
    #[error("value is {0}, not Concrete")]
    BadState(EnvelopeState),
}

impl FiatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FiatError::BadInput(_) => ErrorKind::BadInput,
            FiatError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            FiatError::RuntimeFailure(_) => ErrorKind::RuntimeFailure,
            FiatError::CompileFailure(_) => ErrorKind::CompileFailure,
            FiatError::LinkIllegal(_) => ErrorKind::LinkIllegal,
            FiatError::PersistFailure(_) => ErrorKind::PersistFailure,
            FiatError::BadState(_) => ErrorKind::BadState,
        }
    }
}

pub type FiatResult<T> = Result<T, FiatError>;
