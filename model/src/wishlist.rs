//! Products saved for later.

use crate::cart::{self, CartView};
use crate::db::Connection;
use crate::error::{Error, Result};
use crate::pricing::Options;
use crate::schema::{Id, Product, WishlistEntry};
use chrono::Utc;

/// The products on `user`'s wishlist, most recently added first.
pub async fn list(conn: &Connection, user: Id) -> Vec<Product> {
    conn.read(|db| {
        let mut entries = db.wishlists.get(&user).cloned().unwrap_or_default();
        entries.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        entries
            .into_iter()
            .filter_map(|entry| db.products.get(&entry.product).cloned())
            .collect()
    })
    .await
}

/// Save `product` to `user`'s wishlist.
///
/// Adding a product which is already on the wishlist does nothing.
pub async fn add(conn: &Connection, user: Id, product: Id) -> Result<Vec<Product>> {
    conn.write(|db| {
        if !db.products.get(&product).map_or(false, |p| p.active) {
            return Err(Error::not_found("product", product));
        }
        let wishlist = db.wishlists.entry(user).or_default();
        if !wishlist.iter().any(|entry| entry.product == product) {
            wishlist.push(WishlistEntry {
                product,
                added_at: Utc::now(),
            });
        }
        Ok(())
    })
    .await?;
    Ok(list(conn, user).await)
}

/// Take `product` off `user`'s wishlist.
pub async fn remove(conn: &Connection, user: Id, product: Id) -> Result<Vec<Product>> {
    conn.write(|db| {
        let wishlist = db
            .wishlists
            .get_mut(&user)
            .filter(|wishlist| wishlist.iter().any(|entry| entry.product == product))
            .ok_or_else(|| Error::not_found("wishlist item", product))?;
        wishlist.retain(|entry| entry.product != product);
        Ok(())
    })
    .await?;
    Ok(list(conn, user).await)
}

/// Move `product` from `user`'s wishlist into their cart, with a quantity of 1.
///
/// If the product cannot be added to the cart (for example, because it is out of stock) it stays
/// on the wishlist.
pub async fn move_to_cart(
    conn: &Connection,
    opt: &Options,
    user: Id,
    product: Id,
) -> Result<CartView> {
    conn.write(|db| {
        if !db
            .wishlists
            .get(&user)
            .map_or(false, |wishlist| wishlist.iter().any(|entry| entry.product == product))
        {
            return Err(Error::not_found("wishlist item", product));
        }
        cart::add_in(db, opt, user, product, 1)?;
        if let Some(wishlist) = db.wishlists.get_mut(&user) {
            wishlist.retain(|entry| entry.product != product);
        }
        Ok(cart::view_in(db, opt, user))
    })
    .await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{customer, seeded};

    #[async_std::test]
    async fn add_is_idempotent() {
        let (conn, products) = seeded().await;
        let user = customer(&conn, "alice").await;

        add(&conn, user.id, products["Milk"].id).await.unwrap();
        let list = add(&conn, user.id, products["Milk"].id).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Milk");

        let list = remove(&conn, user.id, products["Milk"].id).await.unwrap();
        assert!(list.is_empty());
        let err = remove(&conn, user.id, products["Milk"].id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }), "{err}");
    }

    #[async_std::test]
    async fn move_to_cart_keeps_unavailable_items() {
        let (conn, products) = seeded().await;
        let user = customer(&conn, "alice").await;
        let opt = Options::default();

        add(&conn, user.id, products["Saffron"].id).await.unwrap();
        add(&conn, user.id, products["Apples"].id).await.unwrap();

        let err = move_to_cart(&conn, &opt, user.id, products["Saffron"].id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutOfStock { .. }), "{err}");

        let cart = move_to_cart(&conn, &opt, user.id, products["Apples"].id)
            .await
            .unwrap();
        assert_eq!(cart.item_count, 1);

        let remaining = list(&conn, user.id).await;
        assert_eq!(
            remaining.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            ["Saffron"]
        );
    }

    #[async_std::test]
    async fn deleted_products_leave_wishlists() {
        let (conn, products) = seeded().await;
        let user = customer(&conn, "alice").await;
        add(&conn, user.id, products["Milk"].id).await.unwrap();
        crate::catalog::delete(&conn, products["Milk"].id).await.unwrap();
        assert!(list(&conn, user.id).await.is_empty());

        let err = add(&conn, user.id, products["Milk"].id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }), "{err}");
    }
}
