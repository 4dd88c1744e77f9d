#![cfg(test)]

//! End-to-end tests of the HTTP API.
//!
//! This runner starts a server backed by a fresh in-memory store on an unused port, then runs
//! each scenario below against it with an HTTP client. Scenarios run concurrently against the same
//! server, so each one registers its own accounts and products and makes no assumptions about
//! data created by the others.
//!
//! Use `cargo test -p grocer-server` to run the tests.

use super::Options;
use ansi_term::Color;
use anyhow::{ensure, Error};
use async_std::task::{sleep, spawn};
use futures::future::{join_all, BoxFuture, FutureExt};
use model::{
    auth, db, pricing,
    testing::{password, ADMIN_EMAIL},
};
use portpicker::pick_unused_port;
use serde_json::{json, Value};
use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use surf::{http::StatusCode, Client};

type Scenario = fn(Client) -> BoxFuture<'static, Result<(), Error>>;

fn scenarios() -> Vec<(&'static str, Scenario)> {
    vec![
        ("accounts", (|client| accounts(client).boxed()) as Scenario),
        ("wallet_checkout", (|client| wallet_checkout(client).boxed()) as Scenario),
        ("cash_on_delivery", (|client| cash_on_delivery(client).boxed()) as Scenario),
        ("shopping", (|client| shopping(client).boxed()) as Scenario),
        ("back_office", (|client| back_office(client).boxed()) as Scenario),
    ]
}

#[async_std::test]
async fn http_api_scenarios() -> Result<(), Error> {
    model::init_logging();

    // Start a server.
    let port = pick_unused_port().unwrap();
    let opt = Options {
        port,
        admin_email: Some(ADMIN_EMAIL.into()),
        admin_password: Some(password().into()),
        db: db::Options::in_memory(),
        auth: auth::Options::default(),
        pricing: pricing::Options::default(),
    };
    spawn(async move {
        opt.serve().await.unwrap();
        tracing::warn!("server exited");
    });

    // Connect a client.
    let client: Client = surf::Config::default()
        .set_base_url(format!("http://localhost:{port}").parse().unwrap())
        .try_into()
        .unwrap();
    // Wait for the server to come up.
    wait_for_server(&client).await?;

    let results = join_all(scenarios().into_iter().map(|(name, scenario)| {
        let client = client.clone();
        async move {
            TestResult {
                name,
                failure: scenario(client).await.err(),
            }
        }
    }))
    .await;
    for result in &results {
        println!("{}", result);
    }
    if results.iter().any(TestResult::failed) {
        Err(Error::msg(format!("{}", Color::Red.paint("tests failed"))))
    } else {
        println!("All scenarios passed.");
        Ok(())
    }
}

struct TestResult {
    name: &'static str,
    failure: Option<anyhow::Error>,
}

impl TestResult {
    fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

impl Display for TestResult {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}...", self.name)?;
        if let Some(err) = &self.failure {
            writeln!(f, "{}", Color::Red.paint("FAILED"))?;
            write!(f, "{err}")?;
        } else {
            write!(f, "{}", Color::Green.paint("OK"))?;
        }
        Ok(())
    }
}

async fn wait_for_server(client: &Client) -> Result<(), Error> {
    const MAX_CONNECT_RETRIES: usize = 60;

    for _ in 0..MAX_CONNECT_RETRIES {
        match client.get("/api/health").await {
            Ok(res) if res.status() == StatusCode::Ok => return Ok(()),
            Ok(res) => tracing::warn!("waiting for server to start: {}", res.status()),
            Err(err) => tracing::warn!("waiting for server to start: {err}"),
        }
        sleep(Duration::from_secs(1)).await;
    }

    Err(Error::msg("timed out waiting for server"))
}

/// An HTTP client, optionally logged in.
#[derive(Clone)]
struct Api {
    client: Client,
    token: Option<String>,
}

impl Api {
    fn anonymous(client: Client) -> Self {
        Self {
            client,
            token: None,
        }
    }

    async fn login(client: Client, email: &str, password: &str) -> Result<Self, Error> {
        let api = Self::anonymous(client);
        let session = api
            .expect(
                StatusCode::Ok,
                "POST",
                "/api/auth/login",
                Some(json!({ "email": email, "password": password })),
            )
            .await?;
        let token = session["token"]
            .as_str()
            .ok_or_else(|| Error::msg(format!("login response has no token: {session}")))?;
        Ok(Self {
            token: Some(token.into()),
            ..api
        })
    }

    /// Register a new customer and log in as them.
    async fn customer(client: Client, name: &str) -> Result<Self, Error> {
        let email = format!("{name}@shoppers.test");
        Self::anonymous(client.clone())
            .expect(
                StatusCode::Created,
                "POST",
                "/api/auth/register",
                Some(json!({ "name": name, "email": email, "password": password() })),
            )
            .await?;
        Self::login(client, &email, password()).await
    }

    async fn admin(client: Client) -> Result<Self, Error> {
        Self::login(client, ADMIN_EMAIL, password()).await
    }

    /// Make a request, returning the status and the JSON body, if any.
    async fn call(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value), Error> {
        let mut req = match method {
            "GET" => self.client.get(path),
            "POST" => self.client.post(path),
            "PUT" => self.client.put(path),
            "PATCH" => self.client.patch(path),
            "DELETE" => self.client.delete(path),
            _ => return Err(Error::msg(format!("unsupported method {method}"))),
        };
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.body_json(&body).map_err(Error::msg)?;
        }
        let mut res = req.send().await.map_err(Error::msg)?;
        let text = res.body_string().await.map_err(Error::msg)?;
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|err| Error::msg(format!("cannot parse response body as JSON: {err}")))?
        };
        Ok((res.status(), value))
    }

    /// Make a request and check that it gets the expected status.
    async fn expect(
        &self,
        status: StatusCode,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, Error> {
        let (actual, value) = self.call(method, path, body).await?;
        ensure!(
            actual == status,
            "{method} {path}: expected {status}, got {actual}: {value}"
        );
        if !status.is_success() {
            ensure!(
                value["error"].is_string(),
                "{method} {path}: error response has no message: {value}"
            );
        }
        Ok(value)
    }
}

fn cents(value: &Value) -> Result<u64, Error> {
    value
        .as_u64()
        .ok_or_else(|| Error::msg(format!("{value} is not an amount")))
}

async fn create_product(admin: &Api, name: &str, price: u64, stock: u32) -> Result<String, Error> {
    let product = admin
        .expect(
            StatusCode::Created,
            "POST",
            "/api/admin/products",
            Some(json!({
                "name": name,
                "category": "pantry",
                "brand": "Test",
                "unit": "1 kg",
                "price": price,
                "stock": stock,
            })),
        )
        .await?;
    Ok(product["id"].as_str().unwrap_or_default().to_string())
}

async fn add_address(api: &Api) -> Result<String, Error> {
    let address = api
        .expect(
            StatusCode::Created,
            "POST",
            "/api/me/addresses",
            Some(json!({
                "label": "Home",
                "line1": "42 Orchard Lane",
                "city": "Springfield",
                "postal_code": "54321",
                "phone": null,
            })),
        )
        .await?;
    Ok(address["id"].as_str().unwrap_or_default().to_string())
}

async fn accounts(client: Client) -> Result<(), Error> {
    let anon = Api::anonymous(client.clone());
    anon.expect(StatusCode::Unauthorized, "GET", "/api/me", None)
        .await?;

    let alice = Api::customer(client.clone(), "alice").await?;
    let me = alice.expect(StatusCode::Ok, "GET", "/api/me", None).await?;
    ensure!(me["email"] == "alice@shoppers.test", "wrong profile: {me}");
    ensure!(me["role"] == "customer", "wrong role: {me}");

    // Duplicate email, bad password.
    anon.expect(
        StatusCode::Conflict,
        "POST",
        "/api/auth/register",
        Some(json!({ "name": "Alice", "email": "ALICE@shoppers.test", "password": "something else" })),
    )
    .await?;
    anon.expect(
        StatusCode::Unauthorized,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": "alice@shoppers.test", "password": "wrong password" })),
    )
    .await?;
    anon.expect(
        StatusCode::BadRequest,
        "POST",
        "/api/auth/register",
        Some(json!({ "name": "Eve", "email": "eve@shoppers.test", "password": "short" })),
    )
    .await?;

    let me = alice
        .expect(
            StatusCode::Ok,
            "PATCH",
            "/api/me",
            Some(json!({ "name": "Alice Liddell" })),
        )
        .await?;
    ensure!(me["name"] == "Alice Liddell", "profile not updated: {me}");

    // Changing the password ends every other session.
    let other = Api::login(client.clone(), "alice@shoppers.test", password()).await?;
    alice
        .expect(
            StatusCode::NoContent,
            "POST",
            "/api/me/password",
            Some(json!({ "current": password(), "new": "new password!" })),
        )
        .await?;
    other
        .expect(StatusCode::Unauthorized, "GET", "/api/me", None)
        .await?;
    alice.expect(StatusCode::Ok, "GET", "/api/me", None).await?;

    alice
        .expect(StatusCode::NoContent, "POST", "/api/auth/logout", None)
        .await?;
    alice
        .expect(StatusCode::Unauthorized, "GET", "/api/me", None)
        .await?;
    Ok(())
}

async fn wallet_checkout(client: Client) -> Result<(), Error> {
    let admin = Api::admin(client.clone()).await?;
    let bob = Api::customer(client.clone(), "bob").await?;
    let rice = create_product(&admin, "Basmati Rice", 1_000, 10).await?;
    let address = add_address(&bob).await?;

    // A product can be browsed anonymously.
    let product = Api::anonymous(client.clone())
        .expect(StatusCode::Ok, "GET", &format!("/api/products/{rice}"), None)
        .await?;
    ensure!(product["name"] == "Basmati Rice", "wrong product: {product}");

    // Top up twice with the same idempotency key; only one credit applies.
    for _ in 0..2 {
        bob.expect(
            StatusCode::Created,
            "POST",
            "/api/wallet/topup",
            Some(json!({ "amount": 20_000, "idempotency_key": "bob-topup-1" })),
        )
        .await?;
    }
    let wallet = bob.expect(StatusCode::Ok, "GET", "/api/wallet", None).await?;
    ensure!(cents(&wallet["balance"])? == 20_000, "wrong balance: {wallet}");

    let cart = bob
        .expect(
            StatusCode::Ok,
            "POST",
            "/api/cart/items",
            Some(json!({ "product": rice, "quantity": 3 })),
        )
        .await?;
    let total = cents(&cart["quote"]["total"])?;
    ensure!(total == 3_000 + 4_900, "wrong quote: {cart}");

    // Asking for more than is in stock fails.
    bob.expect(
        StatusCode::Conflict,
        "PUT",
        &format!("/api/cart/items/{rice}"),
        Some(json!({ "quantity": 11 })),
    )
    .await?;

    let order = bob
        .expect(
            StatusCode::Created,
            "POST",
            "/api/orders",
            Some(json!({ "address": address, "payment_method": "wallet" })),
        )
        .await?;
    ensure!(order["status"] == "placed", "wrong status: {order}");
    ensure!(order["payment_status"] == "paid", "not paid: {order}");
    ensure!(
        order["number"].as_str().unwrap_or_default().starts_with("ORD-"),
        "bad order number: {order}"
    );
    let id = order["id"].as_str().unwrap_or_default().to_string();

    let wallet = bob.expect(StatusCode::Ok, "GET", "/api/wallet", None).await?;
    ensure!(
        cents(&wallet["balance"])? == 20_000 - total,
        "wrong balance after checkout: {wallet}"
    );
    let cart = bob.expect(StatusCode::Ok, "GET", "/api/cart", None).await?;
    ensure!(cart["item_count"] == 0, "cart not emptied: {cart}");
    let product = bob
        .expect(StatusCode::Ok, "GET", &format!("/api/products/{rice}"), None)
        .await?;
    ensure!(product["stock"] == 7, "stock not taken: {product}");

    let tracking = bob
        .expect(
            StatusCode::Ok,
            "GET",
            &format!("/api/orders/{id}/tracking"),
            None,
        )
        .await?;
    ensure!(tracking["steps"][0]["done"] == true, "bad tracking: {tracking}");

    // Nobody else can see the order.
    let carol = Api::customer(client.clone(), "carol").await?;
    carol
        .expect(StatusCode::NotFound, "GET", &format!("/api/orders/{id}"), None)
        .await?;

    let cancelled = bob
        .expect(
            StatusCode::Ok,
            "POST",
            &format!("/api/orders/{id}/cancel"),
            Some(json!({ "reason": "ordered by mistake" })),
        )
        .await?;
    ensure!(cancelled["status"] == "cancelled", "not cancelled: {cancelled}");
    ensure!(
        cancelled["payment_status"] == "refunded",
        "not refunded: {cancelled}"
    );
    let wallet = bob.expect(StatusCode::Ok, "GET", "/api/wallet", None).await?;
    ensure!(cents(&wallet["balance"])? == 20_000, "refund missing: {wallet}");
    Ok(())
}

async fn cash_on_delivery(client: Client) -> Result<(), Error> {
    let admin = Api::admin(client.clone()).await?;
    let dave = Api::customer(client.clone(), "dave").await?;
    let oats = create_product(&admin, "Rolled Oats", 450, 50).await?;
    let address = add_address(&dave).await?;

    // Checking out with an empty cart fails.
    dave.expect(
        StatusCode::BadRequest,
        "POST",
        "/api/orders",
        Some(json!({ "address": address, "payment_method": "cash_on_delivery" })),
    )
    .await?;

    // Wishlist to cart.
    let wishlist = dave
        .expect(StatusCode::Ok, "PUT", &format!("/api/wishlist/{oats}"), None)
        .await?;
    ensure!(
        wishlist.as_array().map_or(0, Vec::len) == 1,
        "bad wishlist: {wishlist}"
    );
    let cart = dave
        .expect(
            StatusCode::Ok,
            "POST",
            &format!("/api/wishlist/{oats}/move"),
            None,
        )
        .await?;
    ensure!(cart["item_count"] == 1, "not moved to cart: {cart}");

    // Not enough money in the wallet.
    dave.expect(
        StatusCode::Conflict,
        "POST",
        "/api/orders",
        Some(json!({ "address": address, "payment_method": "wallet" })),
    )
    .await?;

    let order = dave
        .expect(
            StatusCode::Created,
            "POST",
            "/api/orders",
            Some(json!({ "address": address, "payment_method": "cash_on_delivery" })),
        )
        .await?;
    ensure!(order["payment_status"] == "pending", "bad payment: {order}");
    let id = order["id"].as_str().unwrap_or_default().to_string();
    let path = format!("/api/admin/orders/{id}/status");

    // Customers cannot move orders along.
    dave.expect(
        StatusCode::Forbidden,
        "POST",
        &path,
        Some(json!({ "status": "confirmed" })),
    )
    .await?;

    // Skipping steps is not allowed.
    admin
        .expect(
            StatusCode::Conflict,
            "POST",
            &path,
            Some(json!({ "status": "delivered" })),
        )
        .await?;
    for status in ["confirmed", "packed", "out_for_delivery", "delivered"] {
        admin
            .expect(
                StatusCode::Ok,
                "POST",
                &path,
                Some(json!({ "status": status })),
            )
            .await?;
    }
    let order = dave
        .expect(StatusCode::Ok, "GET", &format!("/api/orders/{id}"), None)
        .await?;
    ensure!(order["status"] == "delivered", "not delivered: {order}");
    ensure!(order["payment_status"] == "paid", "not paid: {order}");

    dave.expect(
        StatusCode::Conflict,
        "POST",
        &format!("/api/orders/{id}/cancel"),
        None,
    )
    .await?;
    Ok(())
}

async fn back_office(client: Client) -> Result<(), Error> {
    let admin = Api::admin(client.clone()).await?;
    let erin = Api::customer(client.clone(), "erin").await?;

    erin.expect(StatusCode::Forbidden, "GET", "/api/admin/dashboard", None)
        .await?;
    let stats = admin
        .expect(StatusCode::Ok, "GET", "/api/admin/dashboard", None)
        .await?;
    ensure!(stats["customers"].as_u64().unwrap_or(0) >= 1, "bad stats: {stats}");

    // Products: create, restock, take off sale.
    let honey = create_product(&admin, "Wildflower Honey", 899, 2).await?;
    let low = admin
        .expect(
            StatusCode::Ok,
            "GET",
            "/api/admin/products/low-stock?threshold=5",
            None,
        )
        .await?;
    ensure!(
        low.as_array()
            .map_or(false, |low| low.iter().any(|p| p["id"] == honey.as_str())),
        "honey not reported as low: {low}"
    );
    let restocked = admin
        .expect(
            StatusCode::Ok,
            "POST",
            &format!("/api/admin/products/{honey}/stock"),
            Some(json!({ "delta": 20 })),
        )
        .await?;
    ensure!(restocked["stock"] == 22, "not restocked: {restocked}");
    admin
        .expect(
            StatusCode::BadRequest,
            "POST",
            &format!("/api/admin/products/{honey}/stock"),
            Some(json!({ "delta": -100 })),
        )
        .await?;
    let updated = admin
        .expect(
            StatusCode::Ok,
            "PATCH",
            &format!("/api/admin/products/{honey}"),
            Some(json!({ "discount_percent": 10 })),
        )
        .await?;
    ensure!(updated["discount_percent"] == 10, "not updated: {updated}");
    admin
        .expect(
            StatusCode::NoContent,
            "DELETE",
            &format!("/api/admin/products/{honey}"),
            None,
        )
        .await?;
    erin.expect(
        StatusCode::NotFound,
        "GET",
        &format!("/api/products/{honey}"),
        None,
    )
    .await?;

    // Products off sale are still visible to administrators, and can be put back on sale.
    erin.expect(
        StatusCode::Forbidden,
        "GET",
        &format!("/api/admin/products/{honey}"),
        None,
    )
    .await?;
    let product = admin
        .expect(
            StatusCode::Ok,
            "GET",
            &format!("/api/admin/products/{honey}"),
            None,
        )
        .await?;
    ensure!(product["active"] == false, "still on sale: {product}");
    let page = admin
        .expect(
            StatusCode::Ok,
            "GET",
            "/api/admin/products?q=wildflower&include_inactive=true",
            None,
        )
        .await?;
    ensure!(page["total"] == 1, "inactive product not listed: {page}");
    let page = erin
        .expect(
            StatusCode::Ok,
            "GET",
            "/api/products?q=wildflower&include_inactive=true",
            None,
        )
        .await?;
    ensure!(page["total"] == 0, "inactive product listed publicly: {page}");
    admin
        .expect(
            StatusCode::Ok,
            "PATCH",
            &format!("/api/admin/products/{honey}"),
            Some(json!({ "active": true })),
        )
        .await?;
    erin.expect(StatusCode::Ok, "GET", &format!("/api/products/{honey}"), None)
        .await?;

    // Absurd prices are rejected.
    admin
        .expect(
            StatusCode::BadRequest,
            "POST",
            "/api/admin/products",
            Some(json!({
                "name": "Gold Bar",
                "category": "pantry",
                "brand": "Test",
                "unit": "1 kg",
                "price": 1_000_000_000_000u64,
                "stock": 1,
            })),
        )
        .await?;

    // Customers.
    let me = erin.expect(StatusCode::Ok, "GET", "/api/me", None).await?;
    let id = me["id"].as_str().unwrap_or_default().to_string();
    let customer = admin
        .expect(
            StatusCode::Ok,
            "GET",
            &format!("/api/admin/customers/{id}"),
            None,
        )
        .await?;
    ensure!(customer["email"] == "erin@shoppers.test", "wrong customer: {customer}");

    admin
        .expect(
            StatusCode::Ok,
            "POST",
            &format!("/api/admin/customers/{id}/block"),
            Some(json!({ "blocked": true })),
        )
        .await?;
    erin.expect(StatusCode::Unauthorized, "GET", "/api/me", None)
        .await?;
    Api::anonymous(client.clone())
        .expect(
            StatusCode::Forbidden,
            "POST",
            "/api/auth/login",
            Some(json!({ "email": "erin@shoppers.test", "password": password() })),
        )
        .await?;

    let orders = admin
        .expect(StatusCode::Ok, "GET", "/api/admin/orders?status=placed", None)
        .await?;
    ensure!(orders.is_array(), "bad order list: {orders}");
    Ok(())
}

async fn shopping(client: Client) -> Result<(), Error> {
    let admin = Api::admin(client.clone()).await?;
    let frank = Api::customer(client.clone(), "frank").await?;
    let jam = create_product(&admin, "Quince Jam", 500, 10).await?;
    let paste = create_product(&admin, "Quince Paste", 300, 10).await?;

    // Search, filter and sort.
    let page = frank
        .expect(
            StatusCode::Ok,
            "GET",
            "/api/products?q=quince&category=pantry&sort=price_asc",
            None,
        )
        .await?;
    ensure!(page["total"] == 2, "wrong search results: {page}");
    ensure!(
        page["items"][0]["id"] == paste.as_str() && page["items"][1]["id"] == jam.as_str(),
        "not sorted by price: {page}"
    );
    let page = frank
        .expect(
            StatusCode::Ok,
            "GET",
            "/api/products?q=quince&min_price=400",
            None,
        )
        .await?;
    ensure!(page["total"] == 1, "price filter ignored: {page}");
    frank
        .expect(StatusCode::BadRequest, "GET", "/api/products?per_page=0", None)
        .await?;

    let categories = frank
        .expect(StatusCode::Ok, "GET", "/api/categories", None)
        .await?;
    ensure!(
        categories.as_array().map_or(false, |categories| categories
            .iter()
            .any(|c| c["category"] == "pantry" && c["products"].as_u64().unwrap_or(0) >= 2)),
        "pantry missing from categories: {categories}"
    );

    // Setting a quantity of zero removes the line; clearing empties the cart.
    for product in [&jam, &paste] {
        frank
            .expect(
                StatusCode::Ok,
                "POST",
                "/api/cart/items",
                Some(json!({ "product": product })),
            )
            .await?;
    }
    let cart = frank
        .expect(
            StatusCode::Ok,
            "PUT",
            &format!("/api/cart/items/{jam}"),
            Some(json!({ "quantity": 0 })),
        )
        .await?;
    ensure!(cart["item_count"] == 1, "line not removed: {cart}");
    ensure!(
        cart["lines"][0]["product"]["id"] == paste.as_str(),
        "wrong line removed: {cart}"
    );
    let cart = frank
        .expect(StatusCode::Ok, "DELETE", "/api/cart", None)
        .await?;
    ensure!(cart["item_count"] == 0, "cart not cleared: {cart}");

    // Saved addresses can be deleted, once.
    let address = add_address(&frank).await?;
    let path = format!("/api/me/addresses/{address}");
    frank
        .expect(StatusCode::NoContent, "DELETE", &path, None)
        .await?;
    frank
        .expect(StatusCode::NotFound, "DELETE", &path, None)
        .await?;
    let me = frank.expect(StatusCode::Ok, "GET", "/api/me", None).await?;
    ensure!(
        me["addresses"].as_array().map_or(false, Vec::is_empty),
        "address not removed: {me}"
    );
    Ok(())
}
