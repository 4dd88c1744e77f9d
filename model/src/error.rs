//! Errors returned by store operations.

use crate::schema::{Money, OrderStatus};
use snafu::Snafu;
use std::fmt::Display;

/// Errors returned by store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{what} {id} not found"))]
    NotFound { what: &'static str, id: String },

    #[snafu(display("invalid request: {message}"))]
    Invalid { message: String },

    #[snafu(display("{message}"))]
    Conflict { message: String },

    #[snafu(display("{message}"))]
    Unauthenticated { message: String },

    #[snafu(display("{message}"))]
    Forbidden { message: String },

    #[snafu(display(
        "not enough stock for {product}: requested {requested}, available {available}"
    ))]
    OutOfStock {
        product: String,
        requested: u32,
        available: u32,
    },

    #[snafu(display("insufficient wallet balance: need {needed}, have {available}"))]
    InsufficientFunds { needed: Money, available: Money },

    #[snafu(display("order {order} cannot move from {from} to {to}"))]
    InvalidTransition {
        order: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[snafu(display("unable to persist snapshot {path}: {source}"))]
    Storage {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("malformed snapshot {path}: {source}"))]
    Snapshot {
        path: String,
        source: serde_json::Error,
    },
}

/// Coarse classification of an [`Error`], used to pick a response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    Conflict,
    Unauthenticated,
    Forbidden,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Invalid { .. } => ErrorKind::Invalid,
            Self::Conflict { .. }
            | Self::OutOfStock { .. }
            | Self::InsufficientFunds { .. }
            | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Storage { .. } | Self::Snapshot { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(what: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            what,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(message: impl Display) -> Self {
        Self::Invalid {
            message: message.to_string(),
        }
    }

    pub(crate) fn conflict(message: impl Display) -> Self {
        Self::Conflict {
            message: message.to_string(),
        }
    }

    pub(crate) fn unauthenticated(message: impl Display) -> Self {
        Self::Unauthenticated {
            message: message.to_string(),
        }
    }

    pub(crate) fn forbidden(message: impl Display) -> Self {
        Self::Forbidden {
            message: message.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fail with [`Error::Invalid`] unless `cond` holds.
macro_rules! ensure_valid {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::Error::invalid(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_valid;
