//! Checkout and the order lifecycle.

use crate::db::{Connection, Db};
use crate::error::{Error, InvalidTransitionSnafu, OutOfStockSnafu, Result};
use crate::pricing::{self, Options};
use crate::schema::{
    Id, Money, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, StatusEvent,
    TransactionKind, User,
};
use crate::wallet::{self, Movement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ensure;
use strum::IntoEnumIterator;
use uuid::Uuid;

/// How the customer wants their cart delivered and paid for.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CheckoutRequest {
    /// One of the customer's saved addresses.
    pub address: Id,
    pub payment_method: PaymentMethod,
}

/// Filters on the administrator's order listing.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub customer: Option<Id>,
}

/// One step on the way from placing an order to receiving it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackingStep {
    pub status: OrderStatus,
    /// When the order reached this step, if it has.
    pub at: Option<DateTime<Utc>>,
    pub done: bool,
}

/// Where an order is, for display to the customer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tracking {
    pub order: Id,
    pub number: String,
    pub status: OrderStatus,
    /// The delivery steps, in order. Cancelled orders only list the steps they completed.
    pub steps: Vec<TrackingStep>,
    pub history: Vec<StatusEvent>,
}

/// Turn `user`'s cart into an order.
///
/// This checks that everything in the cart is still on sale and in stock, charges the
/// customer's wallet if they chose to pay that way, takes the ordered units out of stock, records
/// the order and empties the cart. Either all of that happens, or (if anything fails) none of it
/// does.
pub async fn checkout(
    conn: &Connection,
    opt: &Options,
    user: Id,
    req: CheckoutRequest,
) -> Result<Order> {
    conn.write(|db| {
        let customer = db
            .users
            .get(&user)
            .ok_or_else(|| Error::not_found("user", user))?;
        let address = customer
            .address(req.address)
            .cloned()
            .ok_or_else(|| Error::not_found("address", req.address))?;
        let lines = db
            .carts
            .get(&user)
            .map(|cart| cart.lines.clone())
            .unwrap_or_default();
        if lines.is_empty() {
            return Err(Error::invalid("cart is empty"));
        }

        let mut priced = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = db
                .products
                .get(&line.product)
                .filter(|product| product.active)
                .ok_or_else(|| Error::not_found("product", line.product))?;
            ensure!(
                product.stock >= line.quantity,
                OutOfStockSnafu {
                    product: product.name.clone(),
                    requested: line.quantity,
                    available: product.stock,
                }
            );
            priced.push((product, line.quantity));
        }
        let quote = pricing::quote(priced.iter().map(|(p, qty)| (*p, *qty)), opt);
        let items = priced
            .iter()
            .map(|(product, quantity)| OrderItem {
                product: product.id,
                name: product.name.clone(),
                unit: product.unit.clone(),
                unit_price: product.effective_price(),
                quantity: *quantity,
                line_total: product.effective_price().times(*quantity),
            })
            .collect::<Vec<_>>();

        let id = Uuid::new_v4();
        let number = format!("ORD-{:06}", db.order_count + 1);

        // Charging the wallet is the last thing which can fail, so it goes first.
        let payment_status = match req.payment_method {
            PaymentMethod::Wallet if quote.total == Money::ZERO => PaymentStatus::Paid,
            PaymentMethod::Wallet => {
                wallet::apply_in(
                    db,
                    user,
                    Movement {
                        kind: TransactionKind::Debit,
                        amount: quote.total,
                        description: format!("payment for order {number}"),
                        order: Some(id),
                        idempotency_key: Some(format!("order:{id}")),
                    },
                )?;
                PaymentStatus::Paid
            }
            PaymentMethod::CashOnDelivery => PaymentStatus::Pending,
        };

        let now = Utc::now();
        for item in &items {
            if let Some(product) = db.products.get_mut(&item.product) {
                product.stock -= item.quantity;
                product.updated_at = now;
            }
        }
        db.carts.remove(&user);
        db.order_count += 1;

        let order = Order {
            id,
            number,
            customer: user,
            items,
            quote,
            shipping_address: address,
            payment_method: req.payment_method,
            payment_status,
            status: OrderStatus::Placed,
            history: vec![StatusEvent {
                status: OrderStatus::Placed,
                note: "order placed".into(),
                at: now,
            }],
            created_at: now,
        };
        db.orders.insert(id, order.clone());
        tracing::info!(
            "order {} placed by {user}: {} items, total {}, paid by {}",
            order.number,
            order.items.len(),
            order.quote.total,
            order.payment_method
        );
        Ok(order)
    })
    .await
}

/// `user`'s orders, newest first.
pub async fn list(conn: &Connection, user: Id) -> Vec<Order> {
    list_all(
        conn,
        &OrderFilter {
            customer: Some(user),
            ..Default::default()
        },
    )
    .await
}

/// Look up an order on behalf of `user`.
///
/// Customers can only see their own orders; administrators can see any order.
pub async fn get(conn: &Connection, user: &User, id: Id) -> Result<Order> {
    conn.read(|db| visible_order(db, user, id).cloned()).await
}

/// Where an order is in its lifecycle.
pub async fn track(conn: &Connection, user: &User, id: Id) -> Result<Tracking> {
    let order = get(conn, user, id).await?;
    let reached = |status| {
        order
            .history
            .iter()
            .find(|event| event.status == status)
            .map(|event| event.at)
    };
    let steps = OrderStatus::iter()
        .filter(|status| *status != OrderStatus::Cancelled)
        .map(|status| TrackingStep {
            status,
            at: reached(status),
            done: reached(status).is_some(),
        })
        .filter(|step| order.status != OrderStatus::Cancelled || step.done)
        .collect();
    Ok(Tracking {
        order: order.id,
        number: order.number.clone(),
        status: order.status,
        steps,
        history: order.history.clone(),
    })
}

/// Cancel one of `user`'s own orders.
///
/// Customers may cancel an order until it has been packed. The ordered units go back into stock
/// and, if the order was paid from the wallet, the payment is refunded to it.
pub async fn cancel(conn: &Connection, user: &User, id: Id, reason: &str) -> Result<Order> {
    conn.write(|db| {
        let order = db
            .orders
            .get(&id)
            .filter(|order| order.customer == user.id)
            .ok_or_else(|| Error::not_found("order", id))?;
        if !matches!(order.status, OrderStatus::Placed | OrderStatus::Confirmed) {
            return Err(Error::conflict(format!(
                "order {} is already {} and can no longer be cancelled",
                order.number, order.status
            )));
        }
        let note = if reason.trim().is_empty() {
            "cancelled by customer".to_string()
        } else {
            format!("cancelled by customer: {}", reason.trim())
        };
        cancel_in(db, id, note)
    })
    .await
}

/// All orders matching `filter`, newest first.
pub async fn list_all(conn: &Connection, filter: &OrderFilter) -> Vec<Order> {
    conn.read(|db| {
        let mut orders = db
            .orders
            .values()
            .filter(|order| filter.status.map_or(true, |s| order.status == s))
            .filter(|order| filter.customer.map_or(true, |c| order.customer == c))
            .cloned()
            .collect::<Vec<_>>();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.number.cmp(&a.number))
        });
        orders
    })
    .await
}

/// Move an order to a new status, as an administrator.
pub async fn update_status(
    conn: &Connection,
    id: Id,
    status: OrderStatus,
    note: &str,
) -> Result<Order> {
    conn.write(|db| {
        let order = db
            .orders
            .get(&id)
            .ok_or_else(|| Error::not_found("order", id))?;
        ensure!(
            order.status.can_become(status),
            InvalidTransitionSnafu {
                order: order.number.clone(),
                from: order.status,
                to: status,
            }
        );
        let note = if note.trim().is_empty() {
            status.to_string().replace('_', " ")
        } else {
            note.trim().to_string()
        };
        if status == OrderStatus::Cancelled {
            return cancel_in(db, id, note);
        }

        let order = db
            .orders
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("order", id))?;
        order.status = status;
        if status == OrderStatus::Delivered && order.payment_method == PaymentMethod::CashOnDelivery
        {
            order.payment_status = PaymentStatus::Paid;
        }
        order.history.push(StatusEvent {
            status,
            note,
            at: Utc::now(),
        });
        tracing::info!("order {} is now {status}", order.number);
        Ok(order.clone())
    })
    .await
}

/// Cancel an order: restock its items and refund any wallet payment.
fn cancel_in(db: &mut Db, id: Id, note: String) -> Result<Order> {
    let order = db
        .orders
        .get(&id)
        .cloned()
        .ok_or_else(|| Error::not_found("order", id))?;

    // The refund is the only step which can fail, so it goes first.
    let refunded = order.payment_method == PaymentMethod::Wallet
        && order.payment_status == PaymentStatus::Paid;
    if refunded && order.quote.total > Money::ZERO {
        wallet::refund_in(db, order.customer, order.quote.total, order.id)?;
    }

    let now = Utc::now();
    for item in &order.items {
        if let Some(product) = db.products.get_mut(&item.product) {
            product.stock = product.stock.saturating_add(item.quantity);
            product.updated_at = now;
        }
    }

    let order = db
        .orders
        .get_mut(&id)
        .ok_or_else(|| Error::not_found("order", id))?;
    order.status = OrderStatus::Cancelled;
    if refunded {
        order.payment_status = PaymentStatus::Refunded;
    }
    order.history.push(StatusEvent {
        status: OrderStatus::Cancelled,
        note,
        at: now,
    });
    tracing::info!("order {} cancelled", order.number);
    Ok(order.clone())
}

/// Find order `id` if `user` is allowed to see it.
fn visible_order<'a>(db: &'a Db, user: &User, id: Id) -> Result<&'a Order> {
    db.orders
        .get(&id)
        .filter(|order| user.is_admin() || order.customer == user.id)
        .ok_or_else(|| Error::not_found("order", id))
}
