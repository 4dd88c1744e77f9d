//! Back-office views over the whole store.

use crate::auth;
use crate::catalog;
use crate::db::{Connection, Db};
use crate::error::{Error, Result};
use crate::pricing::Options;
use crate::schema::{Address, Id, Money, Order, OrderStatus, PaymentStatus, Role, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// Number of entries in each of the dashboard's top-N lists.
pub const DASHBOARD_TOP_N: usize = 5;

/// Units of one product sold across all non-cancelled orders.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProductSales {
    pub product: Id,
    pub name: String,
    pub units: u64,
    pub revenue: Money,
}

/// Store-wide statistics.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Dashboard {
    pub customers: usize,
    pub products: usize,
    pub active_products: usize,
    /// Active products with stock below the configured threshold.
    pub low_stock: usize,
    pub orders: usize,
    pub orders_by_status: BTreeMap<OrderStatus, usize>,
    /// Total of all paid orders which have not been cancelled.
    pub revenue: Money,
    pub average_order_value: Money,
    pub top_products: Vec<ProductSales>,
    pub recent_orders: Vec<Order>,
    pub generated_at: DateTime<Utc>,
}

/// A customer as seen from the back office.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CustomerSummary {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub blocked: bool,
    pub orders: usize,
    pub total_spent: Money,
    pub wallet_balance: Money,
    pub joined_at: DateTime<Utc>,
}

/// A customer together with their addresses and order history.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CustomerDetail {
    #[serde(flatten)]
    pub summary: CustomerSummary,
    pub addresses: Vec<Address>,
    pub orders: Vec<Order>,
}

/// Compute store-wide statistics.
pub async fn dashboard(conn: &Connection, opt: &Options) -> Dashboard {
    conn.read(|db| {
        let mut orders_by_status = BTreeMap::new();
        let mut sales: HashMap<Id, ProductSales> = HashMap::new();
        let mut revenue = Money::ZERO;
        let mut paid = 0u64;
        for order in db.orders.values() {
            *orders_by_status.entry(order.status).or_default() += 1;
            if order.status == OrderStatus::Cancelled {
                continue;
            }
            if order.payment_status == PaymentStatus::Paid {
                revenue += order.quote.total;
                paid += 1;
            }
            for item in &order.items {
                let entry = sales.entry(item.product).or_insert_with(|| ProductSales {
                    product: item.product,
                    name: item.name.clone(),
                    units: 0,
                    revenue: Money::ZERO,
                });
                entry.units += u64::from(item.quantity);
                entry.revenue += item.line_total;
            }
        }

        let mut top_products = sales.into_values().collect::<Vec<_>>();
        top_products.sort_by(|a, b| {
            b.units
                .cmp(&a.units)
                .then_with(|| b.revenue.cmp(&a.revenue))
                .then_with(|| a.name.cmp(&b.name))
        });
        top_products.truncate(DASHBOARD_TOP_N);

        let mut recent_orders = db.orders.values().cloned().collect::<Vec<_>>();
        recent_orders.sort_by_key(|order| Reverse((order.created_at, order.number.clone())));
        recent_orders.truncate(DASHBOARD_TOP_N);

        Dashboard {
            customers: db
                .users
                .values()
                .filter(|user| user.role == Role::Customer)
                .count(),
            products: db.products.len(),
            active_products: db.products.values().filter(|p| p.active).count(),
            low_stock: catalog::low_stock_in(db, opt.low_stock_threshold).len(),
            orders: db.orders.len(),
            orders_by_status,
            revenue,
            average_order_value: match paid {
                0 => Money::ZERO,
                n => Money::cents(revenue.as_cents() / n),
            },
            top_products,
            recent_orders,
            generated_at: Utc::now(),
        }
    })
    .await
}

/// All customers, in the order they signed up.
pub async fn customers(conn: &Connection) -> Vec<CustomerSummary> {
    conn.read(|db| {
        let mut customers = db
            .users
            .values()
            .filter(|user| user.role == Role::Customer)
            .map(|user| summarize(db, user))
            .collect::<Vec<_>>();
        customers.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.email.cmp(&b.email))
        });
        customers
    })
    .await
}

/// One customer in detail.
pub async fn customer(conn: &Connection, id: Id) -> Result<CustomerDetail> {
    conn.read(|db| {
        let user = db
            .users
            .get(&id)
            .filter(|user| user.role == Role::Customer)
            .ok_or_else(|| Error::not_found("customer", id))?;
        let mut orders = db
            .orders
            .values()
            .filter(|order| order.customer == id)
            .cloned()
            .collect::<Vec<_>>();
        orders.sort_by_key(|order| Reverse((order.created_at, order.number.clone())));
        Ok(CustomerDetail {
            summary: summarize(db, user),
            addresses: user.addresses.clone(),
            orders,
        })
    })
    .await
}

/// Block or unblock a customer.
///
/// Blocking a customer also ends all of their sessions.
pub async fn set_blocked(conn: &Connection, id: Id, blocked: bool) -> Result<CustomerSummary> {
    conn.write(|db| {
        let user = db
            .users
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("customer", id))?;
        if user.is_admin() {
            return Err(Error::forbidden("administrators cannot be blocked"));
        }
        user.blocked = blocked;
        if blocked {
            auth::revoke_sessions(db, id, None);
        }
        tracing::info!(
            "customer {id} {}",
            if blocked { "blocked" } else { "unblocked" }
        );
        let user = db
            .users
            .get(&id)
            .ok_or_else(|| Error::not_found("customer", id))?;
        Ok(summarize(db, user))
    })
    .await
}

fn summarize(db: &Db, user: &User) -> CustomerSummary {
    let orders = db
        .orders
        .values()
        .filter(|order| order.customer == user.id)
        .collect::<Vec<_>>();
    CustomerSummary {
        id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        phone: user.phone.clone(),
        blocked: user.blocked,
        orders: orders.len(),
        total_spent: orders
            .iter()
            .filter(|order| {
                order.status != OrderStatus::Cancelled
                    && order.payment_status == PaymentStatus::Paid
            })
            .map(|order| order.quote.total)
            .sum(),
        wallet_balance: db.wallets.get(&user.id).map_or(Money::ZERO, |w| w.balance),
        joined_at: user.created_at,
    }
}
