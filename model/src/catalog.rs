//! Browsing and managing the product catalog.

use crate::db::{Connection, Db};
use crate::error::{ensure_valid, Error, Result};
use crate::schema::{Category, Id, Money, Page, Product, ProductInput, ProductPatch};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use strum::IntoEnumIterator;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
/// The highest list price a product may have.
pub const MAX_PRICE: Money = Money::cents(100_000_000);
const MAX_DISCOUNT_PERCENT: u8 = 90;

/// How to order catalog results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sort {
    /// Best text matches first, then by name.
    #[default]
    Relevance,
    Name,
    PriceAsc,
    PriceDesc,
    Newest,
    Rating,
}

/// Filters on a catalog listing.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ProductQuery {
    pub category: Option<Category>,
    /// Case-insensitive text to look for in the name, brand or description.
    pub q: Option<String>,
    /// Lowest effective price to include, in cents.
    pub min_price: Option<u64>,
    /// Highest effective price to include, in cents.
    pub max_price: Option<u64>,
    /// Only include products with units in stock.
    #[serde(default)]
    pub in_stock: bool,
    #[serde(default)]
    pub sort: Sort,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    /// Include products which have been taken off sale.
    #[serde(default)]
    pub include_inactive: bool,
}

/// The number of products on sale in a category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CategorySummary {
    pub category: Category,
    pub products: usize,
}

/// List products matching `query`.
pub async fn list(conn: &Connection, query: &ProductQuery) -> Result<Page<Product>> {
    let per_page = query.per_page.unwrap_or(DEFAULT_PAGE_SIZE);
    ensure_valid!(
        (1..=MAX_PAGE_SIZE).contains(&per_page),
        "per_page must be between 1 and {MAX_PAGE_SIZE}"
    );
    ensure_valid!(query.page != Some(0), "pages are numbered from 1");
    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        ensure_valid!(min <= max, "min_price must not exceed max_price");
    }
    let needle = query
        .q
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());

    let mut matches = conn
        .read(|db| {
            db.products
                .values()
                .filter(|product| query.include_inactive || product.active)
                .filter(|product| query.category.map_or(true, |c| product.category == c))
                .filter(|product| !query.in_stock || product.in_stock())
                .filter(|product| {
                    let price = product.effective_price();
                    query.min_price.map_or(true, |min| price >= Money::cents(min))
                        && query.max_price.map_or(true, |max| price <= Money::cents(max))
                })
                .filter_map(|product| {
                    let score = match &needle {
                        Some(needle) => relevance(product, needle)?,
                        None => 0,
                    };
                    Some((score, product.clone()))
                })
                .collect::<Vec<_>>()
        })
        .await;

    match query.sort {
        Sort::Relevance => {
            matches.sort_by(|(a_score, a), (b_score, b)| {
                b_score.cmp(a_score).then_with(|| a.name.cmp(&b.name))
            });
        }
        Sort::Name => matches.sort_by(|(_, a), (_, b)| a.name.cmp(&b.name)),
        Sort::PriceAsc => matches.sort_by_key(|(_, p)| (p.effective_price(), p.name.clone())),
        Sort::PriceDesc => {
            matches.sort_by_key(|(_, p)| (Reverse(p.effective_price()), p.name.clone()))
        }
        Sort::Newest => matches.sort_by_key(|(_, p)| (Reverse(p.created_at), p.name.clone())),
        Sort::Rating => matches.sort_by(|(_, a), (_, b)| {
            b.rating
                .total_cmp(&a.rating)
                .then_with(|| a.name.cmp(&b.name))
        }),
    }

    Ok(Page::slice(
        matches.into_iter().map(|(_, product)| product).collect(),
        query.page.unwrap_or(1),
        per_page,
    ))
}

/// How well `product` matches the lowercased search text `needle`, or [`None`] if it does not.
fn relevance(product: &Product, needle: &str) -> Option<u8> {
    let name = product.name.to_lowercase();
    if name == needle {
        Some(4)
    } else if name.starts_with(needle) {
        Some(3)
    } else if name.contains(needle) {
        Some(2)
    } else if product.brand.to_lowercase().contains(needle)
        || product.description.to_lowercase().contains(needle)
    {
        Some(1)
    } else {
        None
    }
}

/// Look up a single product.
///
/// Products which are no longer on sale are only found if `include_inactive` is set.
pub async fn get(conn: &Connection, id: Id, include_inactive: bool) -> Result<Product> {
    conn.read(|db| {
        db.products
            .get(&id)
            .filter(|product| include_inactive || product.active)
            .cloned()
            .ok_or_else(|| Error::not_found("product", id))
    })
    .await
}

/// Count the products on sale in each category.
pub async fn categories(conn: &Connection) -> Vec<CategorySummary> {
    conn.read(|db| {
        Category::iter()
            .map(|category| CategorySummary {
                category,
                products: db
                    .products
                    .values()
                    .filter(|product| product.active && product.category == category)
                    .count(),
            })
            .collect()
    })
    .await
}

/// Add a product to the catalog.
pub async fn create(conn: &Connection, input: ProductInput) -> Result<Product> {
    let mut products = create_many(conn, [input]).await?;
    Ok(products.remove(0))
}

/// Add several products to the catalog at once.
///
/// Either all of the products are added or, if any of them is invalid, none are.
pub async fn create_many(
    conn: &Connection,
    inputs: impl IntoIterator<Item = ProductInput>,
) -> Result<Vec<Product>> {
    let products = inputs
        .into_iter()
        .map(new_product)
        .collect::<Result<Vec<_>>>()?;
    conn.write(move |db| {
        for product in &products {
            db.products.insert(product.id, product.clone());
        }
        tracing::info!("added {} products to the catalog", products.len());
        Ok(products)
    })
    .await
}

/// Change some fields of a product.
pub async fn update(conn: &Connection, id: Id, patch: ProductPatch) -> Result<Product> {
    conn.write(move |db| {
        let mut product = db
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("product", id))?;
        let ProductPatch {
            name,
            description,
            category,
            brand,
            unit,
            price,
            discount_percent,
            stock,
            image_url,
            nutrition,
            rating,
            active,
        } = patch;
        if let Some(name) = name {
            product.name = name.trim().into();
        }
        if let Some(description) = description {
            product.description = description;
        }
        if let Some(category) = category {
            product.category = category;
        }
        if let Some(brand) = brand {
            product.brand = brand;
        }
        if let Some(unit) = unit {
            product.unit = unit.trim().into();
        }
        if let Some(price) = price {
            product.price = price;
        }
        if let Some(discount) = discount_percent {
            product.discount_percent = discount;
        }
        if let Some(stock) = stock {
            product.stock = stock;
        }
        if let Some(url) = image_url {
            product.image_url = Some(url).filter(|url| !url.is_empty());
        }
        if let Some(nutrition) = nutrition {
            product.nutrition = Some(nutrition);
        }
        if let Some(rating) = rating {
            product.rating = rating;
        }
        if let Some(active) = active {
            product.active = active;
        }
        validate(&product)?;

        product.updated_at = Utc::now();
        if !product.active {
            db.unlink_product(id);
        }
        db.products.insert(id, product.clone());
        tracing::info!("updated product {id}");
        Ok(product)
    })
    .await
}

/// Take a product off sale.
///
/// The product document is kept, since past orders refer to it, but it is hidden from the
/// storefront and removed from every cart and wishlist.
pub async fn delete(conn: &Connection, id: Id) -> Result<()> {
    conn.write(move |db| {
        let product = db
            .products
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("product", id))?;
        product.active = false;
        product.updated_at = Utc::now();
        db.unlink_product(id);
        tracing::info!("removed product {id} from sale");
        Ok(())
    })
    .await
}

/// Add `delta` units to a product's stock (or remove them, if `delta` is negative).
pub async fn adjust_stock(conn: &Connection, id: Id, delta: i64) -> Result<Product> {
    conn.write(move |db| {
        let product = db
            .products
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("product", id))?;
        let stock = i64::from(product.stock)
            .checked_add(delta)
            .ok_or_else(|| Error::invalid(format!("cannot adjust stock by {delta}")))?;
        ensure_valid!(
            stock >= 0,
            "cannot remove {} units of {}, only {} in stock",
            delta.unsigned_abs(),
            product.name,
            product.stock
        );
        product.stock =
            u32::try_from(stock).map_err(|_| Error::invalid(format!("stock {stock} is too large")))?;
        product.updated_at = Utc::now();
        tracing::info!("stock of {} adjusted by {delta} to {}", product.name, product.stock);
        Ok(product.clone())
    })
    .await
}

/// Products on sale with fewer than `threshold` units in stock, lowest stock first.
pub async fn low_stock(conn: &Connection, threshold: u32) -> Vec<Product> {
    conn.read(|db| low_stock_in(db, threshold)).await
}

pub(crate) fn low_stock_in(db: &Db, threshold: u32) -> Vec<Product> {
    let mut products = db
        .products
        .values()
        .filter(|product| product.active && product.stock < threshold)
        .cloned()
        .collect::<Vec<_>>();
    products.sort_by(|a, b| a.stock.cmp(&b.stock).then_with(|| a.name.cmp(&b.name)));
    products
}

fn new_product(input: ProductInput) -> Result<Product> {
    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4(),
        name: input.name.trim().into(),
        description: input.description,
        category: input.category,
        brand: input.brand,
        unit: input.unit.trim().into(),
        price: input.price,
        discount_percent: input.discount_percent,
        stock: input.stock,
        image_url: input.image_url,
        nutrition: input.nutrition,
        rating: input.rating,
        active: true,
        created_at: now,
        updated_at: now,
    };
    validate(&product)?;
    Ok(product)
}

fn validate(product: &Product) -> Result<()> {
    ensure_valid!(!product.name.is_empty(), "product name must not be empty");
    ensure_valid!(!product.unit.is_empty(), "product unit must not be empty");
    ensure_valid!(
        product.price <= MAX_PRICE,
        "product price must be at most {MAX_PRICE}"
    );
    ensure_valid!(
        product.discount_percent <= MAX_DISCOUNT_PERCENT,
        "discount must be at most {MAX_DISCOUNT_PERCENT}%"
    );
    ensure_valid!(
        product.effective_price() > Money::ZERO,
        "product price after discount must be positive"
    );
    ensure_valid!(
        (0.0..=5.0).contains(&product.rating),
        "rating must be between 0 and 5"
    );
    Ok(())
}
