//! Sources of products for seeding the catalog.
//!
//! A store can be seeded either from a JSON file of product definitions ([`LocalCatalog`]) or from
//! a [`Generator`], which makes up a plausible, randomized grocery catalog. Generated catalogs are
//! deterministic: the same seed always produces the same products, which makes them useful for
//! demos and load tests.

use crate::catalog;
use crate::db::Connection;
use crate::schema::{Category, Money, Nutrition, Product, ProductInput};
use anyhow::Error;
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::PathBuf;

/// Somewhere to get products from.
#[async_trait]
pub trait CatalogSource {
    /// Load all the products this source describes.
    async fn products(&self) -> Result<Vec<ProductInput>, Error>;
}

/// Add all products from `source` to the catalog.
pub async fn seed<S: CatalogSource + Sync>(
    conn: &Connection,
    source: &S,
) -> Result<Vec<Product>, Error> {
    let inputs = source.products().await?;
    tracing::info!("seeding catalog with {} products", inputs.len());
    Ok(catalog::create_many(conn, inputs).await?)
}

/// Products defined in a JSON file.
///
/// The file should contain an array of objects in the format of [`ProductInput`].
pub struct LocalCatalog {
    path: PathBuf,
}

impl LocalCatalog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for LocalCatalog {
    async fn products(&self) -> Result<Vec<ProductInput>, Error> {
        let bytes = async_std::fs::read(&self.path).await.map_err(|err| {
            Error::msg(format!("unable to read {}: {err}", self.path.display()))
        })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            Error::msg(format!(
                "{} is not a valid product list: {err}",
                self.path.display()
            ))
        })
    }
}

/// A randomized mock catalog.
#[derive(Clone, Copy, Debug)]
pub struct Generator {
    seed: u64,
    count: usize,
}

impl Generator {
    /// A generator of `count` products, determined by `seed`.
    pub fn new(seed: u64, count: usize) -> Self {
        Self { seed, count }
    }

    /// Make up the products.
    pub fn generate(&self) -> Vec<ProductInput> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        (0..self.count)
            .map(|i| {
                let aisle = &AISLES[rng.gen_range(0..AISLES.len())];
                aisle.product(&mut rng, i)
            })
            .collect()
    }
}

#[async_trait]
impl CatalogSource for Generator {
    async fn products(&self) -> Result<Vec<ProductInput>, Error> {
        Ok(self.generate())
    }
}

/// Nutrition ranges for a category, per 100 g: calories, protein, carbs, fat, fiber.
type NutritionProfile = ((u32, u32), (f32, f32), (f32, f32), (f32, f32), (f32, f32));

/// What products look like in one category.
struct Aisle {
    category: Category,
    names: &'static [&'static str],
    brands: &'static [&'static str],
    units: &'static [&'static str],
    /// Range of list prices, in cents.
    prices: (u64, u64),
    nutrition: Option<NutritionProfile>,
}

const ADJECTIVES: &[&str] = &["Organic", "Fresh", "Farm", "Premium", "Classic", "Local"];
const DISCOUNTS: &[u8] = &[5, 10, 15, 20, 25, 30, 40];

const AISLES: &[Aisle] = &[
    Aisle {
        category: Category::Fruits,
        names: &["Apples", "Bananas", "Oranges", "Mangoes", "Grapes", "Strawberries", "Pears"],
        brands: &["Orchard Hill", "Sunvale", "Green Acre"],
        units: &["500 g", "1 kg", "6 pcs", "250 g"],
        prices: (99, 899),
        nutrition: Some(((30, 90), (0.3, 1.5), (8.0, 23.0), (0.1, 0.5), (1.0, 4.0))),
    },
    Aisle {
        category: Category::Vegetables,
        names: &["Tomatoes", "Potatoes", "Onions", "Carrots", "Spinach", "Broccoli", "Peppers"],
        brands: &["Green Acre", "Field Fresh", "Sunvale"],
        units: &["500 g", "1 kg", "250 g", "1 bunch"],
        prices: (49, 599),
        nutrition: Some(((15, 80), (0.8, 3.5), (2.0, 18.0), (0.1, 0.6), (1.5, 5.0))),
    },
    Aisle {
        category: Category::Dairy,
        names: &["Milk", "Yogurt", "Cheddar", "Butter", "Paneer", "Cream", "Mozzarella"],
        brands: &["Meadow Gold", "Alpine", "Dairy Best"],
        units: &["500 ml", "1 l", "200 g", "400 g"],
        prices: (149, 1299),
        nutrition: Some(((40, 720), (0.8, 25.0), (0.5, 6.0), (1.0, 81.0), (0.0, 0.1))),
    },
    Aisle {
        category: Category::Bakery,
        names: &["Sourdough", "Bagels", "Croissants", "Whole Wheat Bread", "Muffins", "Baguette"],
        brands: &["Stone Mill", "Golden Crust", "Baker Street"],
        units: &["400 g", "4 pcs", "6 pcs", "1 loaf"],
        prices: (199, 899),
        nutrition: Some(((230, 420), (6.0, 13.0), (40.0, 60.0), (1.0, 22.0), (2.0, 7.0))),
    },
    Aisle {
        category: Category::Meat,
        names: &["Chicken Breast", "Ground Beef", "Pork Chops", "Lamb Shoulder", "Turkey Mince"],
        brands: &["Prairie Farms", "Butcher's Block"],
        units: &["500 g", "1 kg", "250 g"],
        prices: (499, 2499),
        nutrition: Some(((110, 290), (18.0, 31.0), (0.0, 0.5), (1.5, 22.0), (0.0, 0.0))),
    },
    Aisle {
        category: Category::Seafood,
        names: &["Salmon Fillet", "Prawns", "Cod", "Tuna Steak", "Mussels"],
        brands: &["Blue Harbor", "Coastline"],
        units: &["250 g", "500 g", "400 g"],
        prices: (599, 2999),
        nutrition: Some(((80, 210), (16.0, 25.0), (0.0, 4.0), (0.5, 13.0), (0.0, 0.0))),
    },
    Aisle {
        category: Category::Beverages,
        names: &["Orange Juice", "Green Tea", "Coffee Beans", "Sparkling Water", "Cola", "Lemonade"],
        brands: &["Brewhouse", "Clear Spring", "Citrus Co"],
        units: &["1 l", "500 ml", "6 pack", "250 g"],
        prices: (99, 1499),
        nutrition: Some(((0, 50), (0.0, 0.8), (0.0, 12.0), (0.0, 0.2), (0.0, 0.5))),
    },
    Aisle {
        category: Category::Snacks,
        names: &["Potato Chips", "Trail Mix", "Dark Chocolate", "Pretzels", "Granola Bars", "Popcorn"],
        brands: &["Crunchy Co", "Nutty Nook", "Cocoa Lane"],
        units: &["150 g", "200 g", "100 g", "6 pack"],
        prices: (149, 799),
        nutrition: Some(((380, 600), (4.0, 15.0), (40.0, 70.0), (10.0, 40.0), (2.0, 10.0))),
    },
    Aisle {
        category: Category::Pantry,
        names: &["Basmati Rice", "Pasta", "Olive Oil", "Lentils", "Flour", "Honey", "Peanut Butter"],
        brands: &["Harvest Table", "Golden Grain", "Nonna's"],
        units: &["1 kg", "500 g", "750 ml", "5 kg"],
        prices: (199, 2499),
        nutrition: Some(((300, 880), (0.0, 25.0), (0.0, 80.0), (0.5, 100.0), (0.0, 11.0))),
    },
    Aisle {
        category: Category::Frozen,
        names: &["Frozen Peas", "Ice Cream", "Fish Fingers", "Frozen Pizza", "Mixed Berries"],
        brands: &["Polar", "Frostbite", "Snowcap"],
        units: &["500 g", "1 l", "400 g", "1 kg"],
        prices: (249, 1199),
        nutrition: Some(((50, 270), (2.0, 14.0), (8.0, 35.0), (0.2, 14.0), (1.0, 5.0))),
    },
    Aisle {
        category: Category::Household,
        names: &["Dish Soap", "Laundry Detergent", "Paper Towels", "Trash Bags", "Sponges"],
        brands: &["Sparkle", "HomePro", "CleanRight"],
        units: &["500 ml", "2 l", "6 rolls", "30 pcs"],
        prices: (199, 1999),
        nutrition: None,
    },
    Aisle {
        category: Category::PersonalCare,
        names: &["Shampoo", "Toothpaste", "Hand Soap", "Body Lotion", "Deodorant"],
        brands: &["Pure Leaf", "Daily Care", "Bloom"],
        units: &["250 ml", "100 g", "400 ml", "1 pc"],
        prices: (149, 1499),
        nutrition: None,
    },
];

impl Aisle {
    fn product(&self, rng: &mut StdRng, index: usize) -> ProductInput {
        let base = pick(rng, self.names);
        let name = if rng.gen_bool(0.5) {
            format!("{} {base}", pick(rng, ADJECTIVES))
        } else {
            base.to_string()
        };
        let brand = pick(rng, self.brands);
        let unit = pick(rng, self.units);

        // Round prices to end in 9 cents, like a real shelf label.
        let price = rng.gen_range(self.prices.0..=self.prices.1) / 10 * 10 + 9;
        let stock = if rng.gen_bool(0.1) {
            0
        } else {
            rng.gen_range(1..=200)
        };
        let discount_percent = if rng.gen_bool(0.25) {
            DISCOUNTS[rng.gen_range(0..DISCOUNTS.len())]
        } else {
            0
        };
        let nutrition = self.nutrition.map(|(calories, protein, carbs, fat, fiber)| Nutrition {
            calories: rng.gen_range(calories.0..=calories.1),
            protein_g: tenths(rng.gen_range(protein.0..=protein.1)),
            carbs_g: tenths(rng.gen_range(carbs.0..=carbs.1)),
            fat_g: tenths(rng.gen_range(fat.0..=fat.1)),
            fiber_g: tenths(rng.gen_range(fiber.0..=fiber.1)),
        });
        let slug = name.to_lowercase().replace(' ', "-");

        ProductInput {
            description: format!("{brand} {}, {unit}.", name.to_lowercase()),
            category: self.category,
            brand: brand.into(),
            unit: unit.into(),
            price: Money::cents(price),
            discount_percent,
            stock,
            image_url: Some(format!(
                "https://images.grocer.example/{}/{slug}-{index}.jpg",
                self.category
            )),
            nutrition,
            rating: tenths(rng.gen_range(3.0..=5.0)),
            name,
        }
    }
}

fn pick(rng: &mut StdRng, items: &[&'static str]) -> &'static str {
    items[rng.gen_range(0..items.len())]
}

/// Round to one decimal place.
fn tenths(x: f32) -> f32 {
    (x * 10.0).round() / 10.0
}
