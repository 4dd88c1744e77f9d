//! Data model and business logic for the grocery storefront.
//!
//! Everything is stored in a [`db::Connection`]. The other modules are collections of async
//! operations on a connection, grouped by the part of the store they deal with: [`auth`] for
//! accounts and sessions, [`catalog`] for products, [`cart`], [`wishlist`], [`wallet`] and
//! [`orders`] for the shopper, and [`admin`] for the back office.

pub mod admin;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod db;
pub mod error;
pub mod generator;
pub mod orders;
pub mod pricing;
pub mod schema;
pub mod wallet;
pub mod wishlist;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, ErrorKind, Result};

use tracing_subscriber::EnvFilter;

/// Install a global subscriber which logs to stderr.
///
/// The log level is taken from `RUST_LOG`, defaulting to `info`. Calling this more than once is
/// harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
