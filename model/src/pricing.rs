//! What a set of products costs.

use crate::schema::{Money, Product, Quote};
use clap::Args;

/// Pricing and inventory rules.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Delivery fee charged on orders below the free delivery threshold, in cents.
    #[clap(long, env = "GROCER_DELIVERY_FEE", default_value = "4900")]
    pub delivery_fee: u64,

    /// Orders with a subtotal of at least this many cents are delivered for free.
    #[clap(long, env = "GROCER_FREE_DELIVERY_THRESHOLD", default_value = "50000")]
    pub free_delivery_threshold: u64,

    /// The largest quantity of a single product allowed in one cart.
    #[clap(long, env = "GROCER_MAX_ITEM_QUANTITY", default_value = "20")]
    pub max_item_quantity: u32,

    /// Products with fewer units than this in stock are reported as running low.
    #[clap(long, env = "GROCER_LOW_STOCK_THRESHOLD", default_value = "10")]
    pub low_stock_threshold: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            delivery_fee: 4900,
            free_delivery_threshold: 50000,
            max_item_quantity: 20,
            low_stock_threshold: 10,
        }
    }
}

/// Price `quantity` units of each product.
pub fn quote<'a>(lines: impl IntoIterator<Item = (&'a Product, u32)>, opt: &Options) -> Quote {
    let (list, subtotal) = lines
        .into_iter()
        .fold((Money::ZERO, Money::ZERO), |(list, subtotal), (product, qty)| {
            (
                list + product.price.times(qty),
                subtotal + product.effective_price().times(qty),
            )
        });
    let delivery_fee = if subtotal == Money::ZERO
        || subtotal >= Money::cents(opt.free_delivery_threshold)
    {
        Money::ZERO
    } else {
        Money::cents(opt.delivery_fee)
    };
    Quote {
        subtotal,
        savings: list.saturating_sub(subtotal),
        delivery_fee,
        total: subtotal + delivery_fee,
    }
}
