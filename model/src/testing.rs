//! Fixtures shared by the unit tests and, through the `testing` feature, the server's tests.

use crate::auth::{self, Registration};
use crate::catalog;
use crate::db::Connection;
use crate::schema::{Address, AddressInput, Category, Money, Product, ProductInput, User};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// The password given to every fixture account.
pub fn password() -> &'static str {
    "correct horse battery"
}

/// Email of the fixture administrator.
pub const ADMIN_EMAIL: &str = "admin@example.com";

/// A product which has not been stored anywhere.
pub fn product(name: &str, price: u64, discount_percent: u8, stock: u32) -> Product {
    let now = Utc::now();
    Product {
        id: Uuid::new_v4(),
        name: name.into(),
        description: String::new(),
        category: Category::Pantry,
        brand: "Acme".into(),
        unit: "1 pc".into(),
        price: Money::cents(price),
        discount_percent,
        stock,
        image_url: None,
        nutrition: None,
        rating: 4.0,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Fields of a new product.
pub fn input(
    name: &str,
    category: Category,
    price: u64,
    discount_percent: u8,
    stock: u32,
) -> ProductInput {
    ProductInput {
        name: name.into(),
        description: String::new(),
        category,
        brand: "Acme".into(),
        unit: "1 pc".into(),
        price: Money::cents(price),
        discount_percent,
        stock,
        image_url: None,
        nutrition: None,
        rating: 4.0,
    }
}

/// A fresh in-memory store with a small catalog, and the catalog keyed by product name.
///
/// | Product        | Category  | Price  | Discount | Stock |
/// |----------------|-----------|--------|----------|-------|
/// | Apples         | Fruits    | 3.00   |          | 50    |
/// | Bananas        | Fruits    | 1.20   |          | 100   |
/// | Milk           | Dairy     | 2.50   |          | 30    |
/// | Dark Chocolate | Snacks    | 4.00   | 25%      | 8     |
/// | Bread          | Bakery    | 3.50   | 10%      | 5     |
/// | Saffron        | Pantry    | 900.00 |          | 0     |
/// | Detergent      | Household | 12.99  |          | 40    |
pub async fn seeded() -> (Connection, HashMap<String, Product>) {
    let conn = Connection::in_memory();
    let inputs = vec![
        input("Apples", Category::Fruits, 300, 0, 50),
        input("Bananas", Category::Fruits, 120, 0, 100),
        ProductInput {
            description: "Whole milk, pasteurized".into(),
            ..input("Milk", Category::Dairy, 250, 0, 30)
        },
        ProductInput {
            description: "70% cocoa, made without milk".into(),
            ..input("Dark Chocolate", Category::Snacks, 400, 25, 8)
        },
        ProductInput {
            description: "Sourdough loaf".into(),
            ..input("Bread", Category::Bakery, 350, 10, 5)
        },
        input("Saffron", Category::Pantry, 90000, 0, 0),
        input("Detergent", Category::Household, 1299, 0, 40),
    ];
    let products = catalog::create_many(&conn, inputs)
        .await
        .expect("seed catalog");
    let products = products
        .into_iter()
        .map(|product| (product.name.clone(), product))
        .collect();
    (conn, products)
}

/// Register a customer named `name`, with email `{name}@example.com`.
pub async fn customer(conn: &Connection, name: &str) -> User {
    auth::register(
        conn,
        Registration {
            name: name.into(),
            email: format!("{name}@example.com"),
            password: password().into(),
            phone: None,
        },
    )
    .await
    .expect("register customer")
}

/// Register a customer with one saved delivery address.
pub async fn customer_with_address(conn: &Connection, name: &str) -> (User, Address) {
    let user = customer(conn, name).await;
    let address = auth::add_address(
        conn,
        user.id,
        AddressInput {
            label: "Home".into(),
            line1: "1 Market Street".into(),
            line2: String::new(),
            city: "Springfield".into(),
            postal_code: "12345".into(),
            phone: Some("555-0100".into()),
        },
    )
    .await
    .expect("add address");
    let user = conn
        .read(|db| db.users.get(&user.id).cloned())
        .await
        .expect("registered user");
    (user, address)
}

/// Create the fixture administrator.
pub async fn admin(conn: &Connection) -> User {
    auth::ensure_admin(conn, "Admin", ADMIN_EMAIL, password())
        .await
        .expect("create admin")
}
