//! Customer wallets: a stored balance with a ledger of every movement.
//!
//! Every movement is applied inside a single exclusive [`write`](Connection::write) on the store,
//! so concurrent credits and debits against the same wallet serialize and none is lost. A debit
//! which would take the balance below zero fails without changing anything.
//!
//! Credits and debits may carry an idempotency key. If a movement with the same key has already
//! been applied to the wallet, the original transaction is returned and nothing new is applied,
//! so clients can safely retry requests whose responses they never saw.

use crate::db::{Connection, Db};
use crate::error::{ensure_valid, Error, InsufficientFundsSnafu, Result};
use crate::schema::{Id, Money, TransactionKind, Wallet, WalletTransaction};
use chrono::Utc;
use uuid::Uuid;

/// The largest amount which can be added to a wallet at once, in cents.
pub const MAX_TOP_UP: Money = Money::cents(100_000_000);

/// The current balance of `user`'s wallet.
pub async fn balance(conn: &Connection, user: Id) -> Money {
    conn.read(|db| db.wallets.get(&user).map_or(Money::ZERO, |w| w.balance))
        .await
}

/// `user`'s wallet, including its full ledger.
pub async fn statement(conn: &Connection, user: Id) -> Wallet {
    conn.read(|db| {
        db.wallets
            .get(&user)
            .cloned()
            .unwrap_or_else(|| Wallet::new(user))
    })
    .await
}

/// The movements on `user`'s wallet, newest first.
pub async fn history(conn: &Connection, user: Id) -> Vec<WalletTransaction> {
    conn.read(|db| {
        db.wallets
            .get(&user)
            .map(|w| w.transactions.iter().rev().cloned().collect())
            .unwrap_or_default()
    })
    .await
}

/// Add money to `user`'s wallet.
pub async fn credit(
    conn: &Connection,
    user: Id,
    amount: Money,
    description: &str,
    idempotency_key: Option<String>,
) -> Result<WalletTransaction> {
    ensure_valid!(
        amount <= MAX_TOP_UP,
        "at most {MAX_TOP_UP} can be added at once"
    );
    conn.write(|db| {
        apply_in(
            db,
            user,
            Movement {
                kind: TransactionKind::Credit,
                amount,
                description: description.into(),
                order: None,
                idempotency_key,
            },
        )
    })
    .await
}

/// Take money out of `user`'s wallet.
pub async fn debit(
    conn: &Connection,
    user: Id,
    amount: Money,
    description: &str,
    order: Option<Id>,
    idempotency_key: Option<String>,
) -> Result<WalletTransaction> {
    conn.write(|db| {
        apply_in(
            db,
            user,
            Movement {
                kind: TransactionKind::Debit,
                amount,
                description: description.into(),
                order,
                idempotency_key,
            },
        )
    })
    .await
}

/// Return money paid for `order` to `user`'s wallet.
pub async fn refund(
    conn: &Connection,
    user: Id,
    amount: Money,
    order: Id,
) -> Result<WalletTransaction> {
    conn.write(|db| refund_in(db, user, amount, order)).await
}

pub(crate) fn refund_in(
    db: &mut Db,
    user: Id,
    amount: Money,
    order: Id,
) -> Result<WalletTransaction> {
    apply_in(
        db,
        user,
        Movement {
            kind: TransactionKind::Refund,
            amount,
            description: format!("refund for order {order}"),
            order: Some(order),
            idempotency_key: Some(format!("refund:{order}")),
        },
    )
}

/// A wallet movement which has not yet been applied.
pub(crate) struct Movement {
    pub kind: TransactionKind,
    pub amount: Money,
    pub description: String,
    pub order: Option<Id>,
    pub idempotency_key: Option<String>,
}

/// Apply a movement to `user`'s wallet.
pub(crate) fn apply_in(db: &mut Db, user: Id, movement: Movement) -> Result<WalletTransaction> {
    ensure_valid!(movement.amount > Money::ZERO, "amount must be positive");
    if !db.users.contains_key(&user) {
        return Err(Error::not_found("user", user));
    }
    let wallet = db.wallet_mut(user);

    if let Some(key) = &movement.idempotency_key {
        if let Some(prev) = wallet
            .transactions
            .iter()
            .find(|txn| txn.idempotency_key.as_ref() == Some(key))
        {
            if prev.kind != movement.kind || prev.amount != movement.amount {
                return Err(Error::conflict(format!(
                    "idempotency key {key} was already used for a different transaction"
                )));
            }
            tracing::info!("wallet {user}: replayed transaction {}", prev.id);
            return Ok(prev.clone());
        }
    }

    let balance_after = match movement.kind {
        TransactionKind::Credit | TransactionKind::Refund => wallet.balance + movement.amount,
        TransactionKind::Debit => wallet.balance.checked_sub(movement.amount).ok_or_else(|| {
            InsufficientFundsSnafu {
                needed: movement.amount,
                available: wallet.balance,
            }
            .build()
        })?,
    };
    let txn = WalletTransaction {
        id: Uuid::new_v4(),
        kind: movement.kind,
        amount: movement.amount,
        balance_after,
        description: movement.description,
        order: movement.order,
        idempotency_key: movement.idempotency_key,
        created_at: Utc::now(),
    };
    wallet.balance = balance_after;
    wallet.transactions.push(txn.clone());
    tracing::info!(
        "wallet {user}: {} of {}, balance now {balance_after}",
        txn.kind,
        txn.amount
    );
    Ok(txn)
}
