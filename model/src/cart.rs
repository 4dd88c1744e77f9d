//! Shopping carts.

use crate::db::{Connection, Db};
use crate::error::{ensure_valid, Error, OutOfStockSnafu, Result};
use crate::pricing::{self, Options};
use crate::schema::{CartLine, Id, Money, Product, Quote};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A cart line together with the product it refers to.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CartLineView {
    pub product: Product,
    pub quantity: u32,
    pub line_total: Money,
    /// Whether enough units are in stock to fulfil this line right now.
    pub available: bool,
}

/// The contents of a cart, priced.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLineView>,
    pub quote: Quote,
    /// Total number of units in the cart.
    pub item_count: u32,
    /// Whether the cart is non-empty and every line is available.
    pub checkout_ready: bool,
}

/// The contents of `user`'s cart.
pub async fn view(conn: &Connection, opt: &Options, user: Id) -> CartView {
    conn.read(|db| view_in(db, opt, user)).await
}

/// Put `quantity` more units of `product` in `user`'s cart.
pub async fn add_item(
    conn: &Connection,
    opt: &Options,
    user: Id,
    product: Id,
    quantity: u32,
) -> Result<CartView> {
    conn.write(|db| {
        add_in(db, opt, user, product, quantity)?;
        Ok(view_in(db, opt, user))
    })
    .await
}

/// Set the number of units of `product` in `user`'s cart.
///
/// Setting the quantity to 0 removes the product from the cart.
pub async fn set_quantity(
    conn: &Connection,
    opt: &Options,
    user: Id,
    product: Id,
    quantity: u32,
) -> Result<CartView> {
    conn.write(|db| {
        if quantity == 0 {
            remove_in(db, user, product)?;
        } else {
            check_quantity(db, opt, product, quantity)?;
            let cart = db.cart_mut(user);
            match cart.lines.iter_mut().find(|line| line.product == product) {
                Some(line) => line.quantity = quantity,
                None => cart.lines.push(CartLine { product, quantity }),
            }
            cart.updated_at = Utc::now();
        }
        Ok(view_in(db, opt, user))
    })
    .await
}

/// Take `product` out of `user`'s cart.
pub async fn remove_item(
    conn: &Connection,
    opt: &Options,
    user: Id,
    product: Id,
) -> Result<CartView> {
    conn.write(|db| {
        remove_in(db, user, product)?;
        Ok(view_in(db, opt, user))
    })
    .await
}

/// Empty `user`'s cart.
pub async fn clear(conn: &Connection, user: Id) -> Result<()> {
    conn.write(|db| {
        db.carts.remove(&user);
        Ok(())
    })
    .await
}

pub(crate) fn view_in(db: &Db, opt: &Options, user: Id) -> CartView {
    let lines = db
        .carts
        .get(&user)
        .map(|cart| {
            cart.lines
                .iter()
                .filter_map(|line| {
                    let product = db.products.get(&line.product)?;
                    Some(CartLineView {
                        line_total: product.effective_price().times(line.quantity),
                        available: product.active && product.stock >= line.quantity,
                        quantity: line.quantity,
                        product: product.clone(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let quote = pricing::quote(lines.iter().map(|line| (&line.product, line.quantity)), opt);
    CartView {
        item_count: lines.iter().map(|line| line.quantity).sum(),
        checkout_ready: !lines.is_empty() && lines.iter().all(|line| line.available),
        lines,
        quote,
    }
}

pub(crate) fn add_in(
    db: &mut Db,
    opt: &Options,
    user: Id,
    product: Id,
    quantity: u32,
) -> Result<()> {
    ensure_valid!(quantity > 0, "quantity must be at least 1");
    let existing = db
        .carts
        .get(&user)
        .and_then(|cart| cart.lines.iter().find(|line| line.product == product))
        .map_or(0, |line| line.quantity);
    check_quantity(db, opt, product, existing.saturating_add(quantity))?;

    let cart = db.cart_mut(user);
    match cart.lines.iter_mut().find(|line| line.product == product) {
        Some(line) => line.quantity += quantity,
        None => cart.lines.push(CartLine { product, quantity }),
    }
    cart.updated_at = Utc::now();
    Ok(())
}

fn remove_in(db: &mut Db, user: Id, product: Id) -> Result<()> {
    let cart = db
        .carts
        .get_mut(&user)
        .filter(|cart| cart.lines.iter().any(|line| line.product == product))
        .ok_or_else(|| Error::not_found("cart item", product))?;
    cart.lines.retain(|line| line.product != product);
    cart.updated_at = Utc::now();
    Ok(())
}

/// Check that a cart may hold `quantity` units of `product`.
fn check_quantity(db: &Db, opt: &Options, product: Id, quantity: u32) -> Result<()> {
    let product = db
        .products
        .get(&product)
        .filter(|product| product.active)
        .ok_or_else(|| Error::not_found("product", product))?;
    ensure_valid!(
        quantity <= opt.max_item_quantity,
        "at most {} units of {} may be ordered at once",
        opt.max_item_quantity,
        product.name
    );
    snafu::ensure!(
        quantity <= product.stock,
        OutOfStockSnafu {
            product: product.name.clone(),
            requested: quantity,
            available: product.stock,
        }
    );
    Ok(())
}
