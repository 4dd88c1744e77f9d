//! HTTP handlers.

use crate::app::{
    authenticate, bearer_token, body, created, id_param, json, query, require_admin, ApiResult,
    State,
};
use model::{
    admin, auth, cart,
    catalog::{self, ProductQuery},
    orders::{self, CheckoutRequest, OrderFilter},
    schema::{AddressInput, Money, OrderStatus, ProductInput, ProductPatch},
    wallet, wishlist,
};
use serde::Deserialize;
use serde_json::json;
use tide::{Request, Response, StatusCode};
use uuid::Uuid;

type Req = Request<State>;

pub fn mount(app: &mut tide::Server<State>) {
    app.at("/api/health").get(health);

    app.at("/api/auth/register").post(register);
    app.at("/api/auth/login").post(login);
    app.at("/api/auth/logout").post(logout);

    app.at("/api/me").get(me).patch(update_profile);
    app.at("/api/me/password").post(change_password);
    app.at("/api/me/addresses").post(add_address);
    app.at("/api/me/addresses/:address").delete(remove_address);

    app.at("/api/products").get(list_products);
    app.at("/api/products/:product").get(get_product);
    app.at("/api/categories").get(categories);

    app.at("/api/cart").get(view_cart).delete(clear_cart);
    app.at("/api/cart/items").post(add_to_cart);
    app.at("/api/cart/items/:product")
        .put(set_cart_quantity)
        .delete(remove_from_cart);

    app.at("/api/wishlist").get(view_wishlist);
    app.at("/api/wishlist/:product")
        .put(add_to_wishlist)
        .delete(remove_from_wishlist);
    app.at("/api/wishlist/:product/move").post(move_to_cart);

    app.at("/api/wallet").get(view_wallet);
    app.at("/api/wallet/topup").post(top_up);

    app.at("/api/orders").get(list_orders).post(checkout);
    app.at("/api/orders/:order").get(get_order);
    app.at("/api/orders/:order/tracking").get(track_order);
    app.at("/api/orders/:order/cancel").post(cancel_order);

    app.at("/api/admin/dashboard").get(dashboard);
    app.at("/api/admin/customers").get(customers);
    app.at("/api/admin/customers/:customer").get(customer);
    app.at("/api/admin/customers/:customer/block").post(block_customer);
    app.at("/api/admin/orders").get(all_orders);
    app.at("/api/admin/orders/:order/status").post(update_order_status);
    app.at("/api/admin/products")
        .get(catalog_products)
        .post(create_product);
    app.at("/api/admin/products/low-stock").get(low_stock);
    app.at("/api/admin/products/:product")
        .get(catalog_product)
        .patch(update_product)
        .delete(delete_product);
    app.at("/api/admin/products/:product/stock").post(adjust_stock);
}

async fn health(_req: Req) -> tide::Result {
    json(&json!({ "status": "ok" }))
}

// Accounts.

async fn register(mut req: Req) -> tide::Result {
    let reg: auth::Registration = body(&mut req).await?;
    let user = auth::register(&req.state().conn, reg).await.api()?;
    created(&user)
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

async fn login(mut req: Req) -> tide::Result {
    let creds: Credentials = body(&mut req).await?;
    let state = req.state();
    let session = auth::login(&state.conn, &state.auth, &creds.email, &creds.password)
        .await
        .api()?;
    json(&session)
}

async fn logout(req: Req) -> tide::Result {
    let token = bearer_token(&req)?;
    auth::logout(&req.state().conn, &token).await.api()?;
    Ok(Response::new(StatusCode::NoContent))
}

async fn me(req: Req) -> tide::Result {
    json(&authenticate(&req).await?)
}

async fn update_profile(mut req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let patch: auth::ProfilePatch = body(&mut req).await?;
    json(
        &auth::update_profile(&req.state().conn, user.id, patch)
            .await
            .api()?,
    )
}

#[derive(Deserialize)]
struct PasswordChange {
    current: String,
    new: String,
}

async fn change_password(mut req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let token = bearer_token(&req)?;
    let change: PasswordChange = body(&mut req).await?;
    auth::change_password(
        &req.state().conn,
        user.id,
        &token,
        &change.current,
        &change.new,
    )
    .await
    .api()?;
    Ok(Response::new(StatusCode::NoContent))
}

async fn add_address(mut req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let input: AddressInput = body(&mut req).await?;
    created(
        &auth::add_address(&req.state().conn, user.id, input)
            .await
            .api()?,
    )
}

async fn remove_address(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let address = id_param(&req, "address")?;
    auth::remove_address(&req.state().conn, user.id, address)
        .await
        .api()?;
    Ok(Response::new(StatusCode::NoContent))
}

// Catalog.

async fn list_products(req: Req) -> tide::Result {
    let query = ProductQuery {
        include_inactive: false,
        ..query(&req)?
    };
    json(&catalog::list(&req.state().conn, &query).await.api()?)
}

async fn get_product(req: Req) -> tide::Result {
    let id = id_param(&req, "product")?;
    json(&catalog::get(&req.state().conn, id, false).await.api()?)
}

async fn categories(req: Req) -> tide::Result {
    json(&catalog::categories(&req.state().conn).await)
}

// Cart.

async fn view_cart(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let state = req.state();
    json(&cart::view(&state.conn, &state.pricing, user.id).await)
}

async fn clear_cart(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let state = req.state();
    cart::clear(&state.conn, user.id).await.api()?;
    json(&cart::view(&state.conn, &state.pricing, user.id).await)
}

#[derive(Deserialize)]
struct NewCartLine {
    product: Uuid,
    #[serde(default = "one")]
    quantity: u32,
}

fn one() -> u32 {
    1
}

async fn add_to_cart(mut req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let line: NewCartLine = body(&mut req).await?;
    let state = req.state();
    json(
        &cart::add_item(&state.conn, &state.pricing, user.id, line.product, line.quantity)
            .await
            .api()?,
    )
}

#[derive(Deserialize)]
struct Quantity {
    quantity: u32,
}

async fn set_cart_quantity(mut req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let product = id_param(&req, "product")?;
    let Quantity { quantity } = body(&mut req).await?;
    let state = req.state();
    json(
        &cart::set_quantity(&state.conn, &state.pricing, user.id, product, quantity)
            .await
            .api()?,
    )
}

async fn remove_from_cart(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let product = id_param(&req, "product")?;
    let state = req.state();
    json(
        &cart::remove_item(&state.conn, &state.pricing, user.id, product)
            .await
            .api()?,
    )
}

// Wishlist.

async fn view_wishlist(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    json(&wishlist::list(&req.state().conn, user.id).await)
}

async fn add_to_wishlist(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let product = id_param(&req, "product")?;
    json(
        &wishlist::add(&req.state().conn, user.id, product)
            .await
            .api()?,
    )
}

async fn remove_from_wishlist(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let product = id_param(&req, "product")?;
    json(
        &wishlist::remove(&req.state().conn, user.id, product)
            .await
            .api()?,
    )
}

async fn move_to_cart(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let product = id_param(&req, "product")?;
    let state = req.state();
    json(
        &wishlist::move_to_cart(&state.conn, &state.pricing, user.id, product)
            .await
            .api()?,
    )
}

// Wallet.

async fn view_wallet(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let conn = &req.state().conn;
    json(&json!({
        "balance": wallet::balance(conn, user.id).await,
        "transactions": wallet::history(conn, user.id).await,
    }))
}

#[derive(Deserialize)]
struct TopUp {
    amount: Money,
    idempotency_key: Option<String>,
}

async fn top_up(mut req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let header_key = req
        .header("Idempotency-Key")
        .map(|values| values.last().as_str().to_string());
    let top_up: TopUp = body(&mut req).await?;
    let txn = wallet::credit(
        &req.state().conn,
        user.id,
        top_up.amount,
        "wallet top-up",
        top_up.idempotency_key.or(header_key),
    )
    .await
    .api()?;
    created(&txn)
}

// Orders.

async fn checkout(mut req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let checkout: CheckoutRequest = body(&mut req).await?;
    let state = req.state();
    created(
        &orders::checkout(&state.conn, &state.pricing, user.id, checkout)
            .await
            .api()?,
    )
}

async fn list_orders(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    json(&orders::list(&req.state().conn, user.id).await)
}

async fn get_order(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let id = id_param(&req, "order")?;
    json(&orders::get(&req.state().conn, &user, id).await.api()?)
}

async fn track_order(req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let id = id_param(&req, "order")?;
    json(&orders::track(&req.state().conn, &user, id).await.api()?)
}

#[derive(Default, Deserialize)]
struct Cancellation {
    #[serde(default)]
    reason: String,
}

async fn cancel_order(mut req: Req) -> tide::Result {
    let user = authenticate(&req).await?;
    let id = id_param(&req, "order")?;
    // The reason is optional, and so is the body.
    let Cancellation { reason } = if req.len().unwrap_or(0) > 0 {
        body(&mut req).await?
    } else {
        Cancellation::default()
    };
    json(
        &orders::cancel(&req.state().conn, &user, id, &reason)
            .await
            .api()?,
    )
}

// Back office.

async fn dashboard(req: Req) -> tide::Result {
    require_admin(&req).await?;
    let state = req.state();
    json(&admin::dashboard(&state.conn, &state.pricing).await)
}

async fn customers(req: Req) -> tide::Result {
    require_admin(&req).await?;
    json(&admin::customers(&req.state().conn).await)
}

async fn customer(req: Req) -> tide::Result {
    require_admin(&req).await?;
    let id = id_param(&req, "customer")?;
    json(&admin::customer(&req.state().conn, id).await.api()?)
}

#[derive(Deserialize)]
struct Block {
    blocked: bool,
}

async fn block_customer(mut req: Req) -> tide::Result {
    require_admin(&req).await?;
    let id = id_param(&req, "customer")?;
    let Block { blocked } = body(&mut req).await?;
    json(
        &admin::set_blocked(&req.state().conn, id, blocked)
            .await
            .api()?,
    )
}

async fn all_orders(req: Req) -> tide::Result {
    require_admin(&req).await?;
    let filter: OrderFilter = query(&req)?;
    json(&orders::list_all(&req.state().conn, &filter).await)
}

#[derive(Deserialize)]
struct StatusUpdate {
    status: OrderStatus,
    #[serde(default)]
    note: String,
}

async fn update_order_status(mut req: Req) -> tide::Result {
    require_admin(&req).await?;
    let id = id_param(&req, "order")?;
    let update: StatusUpdate = body(&mut req).await?;
    json(
        &orders::update_status(&req.state().conn, id, update.status, &update.note)
            .await
            .api()?,
    )
}

/// List products, including those taken off sale when `include_inactive` is set.
async fn catalog_products(req: Req) -> tide::Result {
    require_admin(&req).await?;
    let query: ProductQuery = query(&req)?;
    json(&catalog::list(&req.state().conn, &query).await.api()?)
}

async fn catalog_product(req: Req) -> tide::Result {
    require_admin(&req).await?;
    let id = id_param(&req, "product")?;
    json(&catalog::get(&req.state().conn, id, true).await.api()?)
}

async fn create_product(mut req: Req) -> tide::Result {
    require_admin(&req).await?;
    let input: ProductInput = body(&mut req).await?;
    created(&catalog::create(&req.state().conn, input).await.api()?)
}

async fn update_product(mut req: Req) -> tide::Result {
    require_admin(&req).await?;
    let id = id_param(&req, "product")?;
    let patch: ProductPatch = body(&mut req).await?;
    json(&catalog::update(&req.state().conn, id, patch).await.api()?)
}

async fn delete_product(req: Req) -> tide::Result {
    require_admin(&req).await?;
    let id = id_param(&req, "product")?;
    catalog::delete(&req.state().conn, id).await.api()?;
    Ok(Response::new(StatusCode::NoContent))
}

#[derive(Deserialize)]
struct StockAdjustment {
    delta: i64,
}

async fn adjust_stock(mut req: Req) -> tide::Result {
    require_admin(&req).await?;
    let id = id_param(&req, "product")?;
    let StockAdjustment { delta } = body(&mut req).await?;
    json(
        &catalog::adjust_stock(&req.state().conn, id, delta)
            .await
            .api()?,
    )
}

#[derive(Deserialize)]
struct Threshold {
    threshold: Option<u32>,
}

async fn low_stock(req: Req) -> tide::Result {
    require_admin(&req).await?;
    let Threshold { threshold } = query(&req)?;
    let state = req.state();
    json(
        &catalog::low_stock(
            &state.conn,
            threshold.unwrap_or(state.pricing.low_stock_threshold),
        )
        .await,
    )
}
