//! The document store backing the grocery backend.
//!
//! All documents live in memory behind a single reader-writer lock. Reads run concurrently;
//! every mutation runs in one exclusive critical section, so a multi-document operation like a
//! checkout (stock, wallet, order and cart all change together) is atomic with respect to every
//! other operation. When a snapshot file is configured, the whole store is written back to disk
//! after each successful mutation and reloaded from it on startup.

use crate::error::{Result, SnapshotSnafu, StorageSnafu};
use crate::schema::{Cart, Id, Order, Product, User, Wallet, WishlistEntry};
use async_std::fs;
use async_std::path::PathBuf;
use async_std::sync::{Arc, RwLock};
use clap::Args;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::HashMap;

/// Store options.
#[derive(Clone, Debug, Default, Args)]
pub struct Options {
    /// JSON file in which to persist the store.
    ///
    /// If the file exists it is loaded on startup. If this option is not given, all data is kept
    /// in memory and lost when the process exits.
    #[clap(long, env = "GROCER_DATA_FILE", name = "FILE")]
    pub data_file: Option<std::path::PathBuf>,
}

impl Options {
    /// Options for a fresh, in-memory store.
    pub fn in_memory() -> Self {
        Self { data_file: None }
    }

    /// Open the store.
    pub async fn connect(&self) -> Result<Connection> {
        match &self.data_file {
            Some(path) => Connection::open(path.clone()).await,
            None => Ok(Connection::in_memory()),
        }
    }
}

/// A password digest and the salt it was computed with.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
    pub salt: String,
    pub digest: String,
}

/// A logged-in session.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionRecord {
    pub user: Id,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// All stored documents, grouped into collections.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Db {
    pub users: HashMap<Id, User>,
    /// Password digests, keyed by user.
    pub credentials: HashMap<Id, Credentials>,
    /// Sessions, keyed by the digest of their bearer token.
    pub sessions: HashMap<String, SessionRecord>,
    pub products: HashMap<Id, Product>,
    /// Carts, keyed by owner.
    pub carts: HashMap<Id, Cart>,
    /// Wishlists, keyed by owner.
    pub wishlists: HashMap<Id, Vec<WishlistEntry>>,
    /// Wallets, keyed by owner.
    pub wallets: HashMap<Id, Wallet>,
    pub orders: HashMap<Id, Order>,
    /// Number of orders ever placed, used to number new orders.
    pub order_count: u64,
}

impl Db {
    /// Look up a user by email.
    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        let email = email.trim().to_lowercase();
        self.users.values().find(|user| user.email == email)
    }

    /// The wallet belonging to `owner`, creating an empty one if necessary.
    pub fn wallet_mut(&mut self, owner: Id) -> &mut Wallet {
        self.wallets
            .entry(owner)
            .or_insert_with(|| Wallet::new(owner))
    }

    /// The cart belonging to `owner`, creating an empty one if necessary.
    pub fn cart_mut(&mut self, owner: Id) -> &mut Cart {
        self.carts.entry(owner).or_insert_with(|| Cart::new(owner))
    }

    /// Remove all references to `product` from carts and wishlists.
    pub fn unlink_product(&mut self, product: Id) {
        for cart in self.carts.values_mut() {
            cart.lines.retain(|line| line.product != product);
        }
        for wishlist in self.wishlists.values_mut() {
            wishlist.retain(|entry| entry.product != product);
        }
    }
}

/// A handle to the store.
///
/// Connections are cheap to [clone](Clone); all clones share the same underlying store.
#[derive(Clone, Debug)]
pub struct Connection {
    db: Arc<RwLock<Db>>,
    snapshot: Option<Arc<PathBuf>>,
}

impl Connection {
    /// Create a fresh, empty store which is never persisted.
    pub fn in_memory() -> Self {
        Self {
            db: Default::default(),
            snapshot: None,
        }
    }

    /// Open a store persisted at `path`.
    ///
    /// If `path` does not exist, the store starts out empty and the file is created on the first
    /// mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let db = if path.exists().await {
            let bytes = fs::read(&path).await.context(StorageSnafu {
                path: path.display().to_string(),
            })?;
            let db: Db = serde_json::from_slice(&bytes).context(SnapshotSnafu {
                path: path.display().to_string(),
            })?;
            tracing::info!(
                "loaded {} users, {} products and {} orders from {}",
                db.users.len(),
                db.products.len(),
                db.orders.len(),
                path.display()
            );
            db
        } else {
            tracing::info!("no snapshot at {}, starting empty", path.display());
            Db::default()
        };
        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            snapshot: Some(Arc::new(path)),
        })
    }

    /// Run a read-only operation against the store.
    pub async fn read<T>(&self, f: impl FnOnce(&Db) -> T) -> T {
        let db = self.db.read().await;
        f(&db)
    }

    /// Run a mutation against the store.
    ///
    /// `f` has exclusive access to the store for its whole duration. If it fails, it must not
    /// have changed anything; operations check all their preconditions before they start
    /// mutating.
    ///
    /// When the store has a snapshot file, `f` runs against a copy of the store, which is
    /// written to the snapshot and only then installed. If the snapshot cannot be written, the
    /// write fails and the store keeps its previous contents, so memory never gets ahead of disk.
    pub async fn write<T>(&self, f: impl FnOnce(&mut Db) -> Result<T>) -> Result<T> {
        let mut db = self.db.write().await;
        match &self.snapshot {
            Some(path) => {
                let mut next = db.clone();
                let res = f(&mut next)?;
                persist(path, &next).await?;
                *db = next;
                Ok(res)
            }
            None => f(&mut db),
        }
    }

    /// Write the store to the snapshot file now.
    ///
    /// This is a no-op for in-memory stores.
    pub async fn flush(&self) -> Result<()> {
        if let Some(path) = &self.snapshot {
            let db = self.db.read().await;
            persist(path, &db).await?;
        }
        Ok(())
    }
}

/// Replace the snapshot at `path` with the contents of `db`.
///
/// The snapshot is written to a temporary file alongside `path` and then renamed over it, so a
/// crash mid-write never leaves a truncated snapshot behind.
async fn persist(path: &PathBuf, db: &Db) -> Result<()> {
    let ctx = || StorageSnafu {
        path: path.display().to_string(),
    };
    let bytes = serde_json::to_vec(db).context(SnapshotSnafu {
        path: path.display().to_string(),
    })?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await.with_context(|_| ctx())?;
    fs::rename(&tmp, path).await.with_context(|_| ctx())?;
    tracing::debug!("persisted snapshot to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    #[async_std::test]
    async fn failed_write_is_reported() {
        let conn = Connection::in_memory();
        let res: Result<()> = conn
            .write(|_| Err(Error::invalid("nope")))
            .await;
        assert!(matches!(res, Err(Error::Invalid { .. })));
    }

    #[async_std::test]
    async fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let conn = Connection::open(path.clone()).await.unwrap();
        conn.write(|db| {
            db.order_count = 7;
            Ok(())
        })
        .await
        .unwrap();
        assert!(path.exists());

        let reopened = Connection::open(path).await.unwrap();
        assert_eq!(reopened.read(|db| db.order_count).await, 7);
    }

    #[async_std::test]
    async fn unwritable_snapshot_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("store.json");

        let conn = Connection::open(path.clone()).await.unwrap();
        let err = conn
            .write(|db| {
                db.order_count = 7;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { .. }), "{err}");
        assert_eq!(conn.read(|db| db.order_count).await, 0);
        assert!(!path.exists());

        // Once the directory exists, writes succeed again.
        std::fs::create_dir(dir.path().join("missing")).unwrap();
        conn.write(|db| {
            db.order_count += 1;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(conn.read(|db| db.order_count).await, 1);
        let reopened = Connection::open(path).await.unwrap();
        assert_eq!(reopened.read(|db| db.order_count).await, 1);
    }

    #[async_std::test]
    async fn malformed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"not json").unwrap();
        let err = Connection::open(path).await.unwrap_err();
        assert!(matches!(err, Error::Snapshot { .. }), "{err}");
    }
}
