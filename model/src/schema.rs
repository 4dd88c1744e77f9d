//! The documents and value types stored by the grocery backend.

use chrono::{DateTime, Utc};
use derive_more::{Add, AddAssign, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::iter::Sum;
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Identifier of any stored document.
pub type Id = Uuid;

/// An amount of money in minor currency units (cents).
///
/// Amounts are never negative; arithmetic which could go below zero goes through
/// [`checked_sub`](Self::checked_sub).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Add,
    AddAssign,
    From,
    Into,
    Deserialize,
    Serialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Self = Self(0);

    /// An amount from its value in minor units.
    pub const fn cents(cents: u64) -> Self {
        Self(cents)
    }

    /// The value of this amount in minor units.
    pub const fn as_cents(self) -> u64 {
        self.0
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Subtract, stopping at zero.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiply by a quantity, stopping at the largest representable amount.
    pub fn times(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(u64::from(quantity)))
    }

    /// This amount with `percent` taken off, rounding the result down.
    pub fn discounted(self, percent: u8) -> Self {
        let keep = u64::from(100 - percent.min(100));
        // Split into whole and fractional hundreds so the product cannot overflow.
        Self(self.0 / 100 * keep + self.0 % 100 * keep / 100)
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, m| acc + m)
    }
}

/// What a user is allowed to do.
#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, Hash, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

/// A registered account.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: Id,
    pub name: String,
    /// Login email, always stored lowercased.
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    /// Blocked users cannot log in or use existing sessions.
    pub blocked: bool,
    pub addresses: Vec<Address>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn address(&self, id: Id) -> Option<&Address> {
        self.addresses.iter().find(|addr| addr.id == id)
    }
}

/// A delivery address saved on a user's profile.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Address {
    pub id: Id,
    /// A short name for the address, like "Home".
    pub label: String,
    pub line1: String,
    #[serde(default)]
    pub line2: String,
    pub city: String,
    pub postal_code: String,
    pub phone: Option<String>,
}

/// Fields of a new [`Address`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AddressInput {
    pub label: String,
    pub line1: String,
    #[serde(default)]
    pub line2: String,
    pub city: String,
    pub postal_code: String,
    pub phone: Option<String>,
}

/// The aisle a product is shelved in.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Fruits,
    Vegetables,
    Dairy,
    Bakery,
    Meat,
    Seafood,
    Beverages,
    Snacks,
    Pantry,
    Frozen,
    Household,
    PersonalCare,
}

impl Category {
    /// Whether products in this category are eaten, and so carry nutrition facts.
    pub fn is_food(&self) -> bool {
        !matches!(self, Self::Household | Self::PersonalCare)
    }
}

/// Nutrition facts per 100 g or 100 ml.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Nutrition {
    pub calories: u32,
    pub protein_g: f32,
    pub carbs_g: f32,
    pub fat_g: f32,
    pub fiber_g: f32,
}

/// An item for sale.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Product {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub brand: String,
    /// The quantity sold as one unit, like "500 g" or "6 pack".
    pub unit: String,
    /// List price of one unit.
    pub price: Money,
    /// Percentage taken off the list price, 0 to 90.
    pub discount_percent: u8,
    /// Units on hand.
    pub stock: u32,
    pub image_url: Option<String>,
    pub nutrition: Option<Nutrition>,
    /// Average review score, 0 to 5.
    pub rating: f32,
    /// Inactive products are hidden from the storefront and cannot be bought.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// The price a customer actually pays for one unit.
    pub fn effective_price(&self) -> Money {
        self.price.discounted(self.discount_percent)
    }

    pub fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// Fields of a new [`Product`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ProductInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    #[serde(default)]
    pub brand: String,
    pub unit: String,
    pub price: Money,
    #[serde(default)]
    pub discount_percent: u8,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub nutrition: Option<Nutrition>,
    #[serde(default)]
    pub rating: f32,
}

/// A partial update to a [`Product`]. Absent fields are left unchanged.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub brand: Option<String>,
    pub unit: Option<String>,
    pub price: Option<Money>,
    pub discount_percent: Option<u8>,
    pub stock: Option<u32>,
    pub image_url: Option<String>,
    pub nutrition: Option<Nutrition>,
    pub rating: Option<f32>,
    pub active: Option<bool>,
}

/// One product and quantity in a cart.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CartLine {
    pub product: Id,
    pub quantity: u32,
}

/// A customer's shopping cart.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Cart {
    pub owner: Id,
    pub lines: Vec<CartLine>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(owner: Id) -> Self {
        Self {
            owner,
            lines: vec![],
            updated_at: Utc::now(),
        }
    }
}

/// A product saved for later.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct WishlistEntry {
    pub product: Id,
    pub added_at: DateTime<Utc>,
}

/// The direction of a wallet movement.
#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, Hash, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionKind {
    /// Money added by the customer.
    Credit,
    /// Money spent on an order.
    Debit,
    /// Money returned from a cancelled order.
    Refund,
}

/// One entry in a wallet ledger.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct WalletTransaction {
    pub id: Id,
    pub kind: TransactionKind,
    pub amount: Money,
    /// Wallet balance immediately after this transaction was applied.
    pub balance_after: Money,
    pub description: String,
    pub order: Option<Id>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A customer's stored balance and its ledger.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Wallet {
    pub owner: Id,
    pub balance: Money,
    pub transactions: Vec<WalletTransaction>,
}

impl Wallet {
    pub fn new(owner: Id) -> Self {
        Self {
            owner,
            balance: Money::ZERO,
            transactions: vec![],
        }
    }
}

/// How an order is paid for.
#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, Hash, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    Wallet,
    CashOnDelivery,
}

#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, Hash, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

/// Where an order is in its lifecycle.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Placed,
    Confirmed,
    Packed,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Whether an order may move directly from `self` to `next`.
    pub fn can_become(self, next: Self) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Placed, Confirmed)
                | (Confirmed, Packed)
                | (Packed, OutForDelivery)
                | (OutForDelivery, Delivered)
                | (Placed | Confirmed | Packed, Cancelled)
        )
    }

    /// Whether the order has reached a status it can never leave.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

/// A product line frozen at the time of purchase.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderItem {
    pub product: Id,
    pub name: String,
    pub unit: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub line_total: Money,
}

/// The amounts charged for a set of lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Quote {
    /// Sum of effective prices.
    pub subtotal: Money,
    /// How much less than list price the customer pays.
    pub savings: Money,
    pub delivery_fee: Money,
    pub total: Money,
}

/// One step in an order's history.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StatusEvent {
    pub status: OrderStatus,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// A placed order.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Order {
    pub id: Id,
    /// Human-readable, sequential order number like "ORD-000042".
    pub number: String,
    pub customer: Id,
    pub items: Vec<OrderItem>,
    pub quote: Quote,
    pub shipping_address: Address,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub history: Vec<StatusEvent>,
    pub created_at: DateTime<Utc>,
}

/// A slice of a larger result set.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based index of this page.
    pub page: usize,
    pub per_page: usize,
    /// Size of the whole result set.
    pub total: usize,
}

impl<T> Page<T> {
    /// Cut page `page` (1-based) of `per_page` items out of `items`.
    pub fn slice(items: Vec<T>, page: usize, per_page: usize) -> Self {
        let total = items.len();
        let page = page.max(1);
        let items = items
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();
        Self {
            items,
            page,
            per_page,
            total,
        }
    }
}
