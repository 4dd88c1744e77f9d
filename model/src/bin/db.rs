use anyhow::bail;
use clap::Parser;
use model::{
    admin, auth, db,
    generator::{self, Generator, LocalCatalog},
    init_logging, pricing,
};
use std::path::PathBuf;

/// Manage the grocery store's data file.
#[derive(Parser)]
enum Command {
    /// Create an empty data file.
    Init {
        #[clap(flatten)]
        db: db::Options,
    },
    /// Fill the catalog with products.
    ///
    /// Products are either read from a JSON file or, if no file is given, generated at random.
    Seed {
        /// Number of products to generate.
        #[clap(short, long, default_value = "100", name = "N")]
        count: usize,

        /// Random seed for the generator. The same seed always generates the same products.
        #[clap(short, long, default_value = "0")]
        seed: u64,

        /// Read products from FILE instead of generating them.
        #[clap(short, long, name = "FILE", conflicts_with_all = ["N", "seed"])]
        file: Option<PathBuf>,

        #[clap(flatten)]
        db: db::Options,
    },
    /// Create an administrator account, or promote an existing account.
    CreateAdmin {
        /// Display name of the administrator.
        #[clap(short, long, default_value = "Administrator")]
        name: String,

        #[clap(short, long, env = "GROCER_ADMIN_EMAIL")]
        email: String,

        #[clap(short, long, env = "GROCER_ADMIN_PASSWORD")]
        password: String,

        #[clap(flatten)]
        db: db::Options,
    },
    /// Print store statistics as JSON.
    Stats {
        #[clap(flatten)]
        db: db::Options,

        #[clap(flatten)]
        pricing: pricing::Options,
    },
}

/// Open the data file named by `db`.
///
/// Every command works on a data file, so running one against a throwaway in-memory store is
/// always a mistake.
async fn open(db: &db::Options) -> Result<db::Connection, anyhow::Error> {
    if db.data_file.is_none() {
        bail!("no data file given; pass --data-file or set GROCER_DATA_FILE");
    }
    Ok(db.connect().await?)
}

#[async_std::main]
async fn main() -> Result<(), anyhow::Error> {
    init_logging();

    match Command::parse() {
        Command::Init { db } => {
            let conn = open(&db).await?;
            conn.flush().await?;
        }
        Command::Seed {
            count,
            seed,
            file,
            db,
        } => {
            let conn = open(&db).await?;
            let products = match file {
                Some(path) => generator::seed(&conn, &LocalCatalog::open(path)).await?,
                None => generator::seed(&conn, &Generator::new(seed, count)).await?,
            };
            tracing::info!("added {} products", products.len());
        }
        Command::CreateAdmin {
            name,
            email,
            password,
            db,
        } => {
            let conn = open(&db).await?;
            let admin = auth::ensure_admin(&conn, &name, &email, &password).await?;
            tracing::info!("{} ({}) is an administrator", admin.name, admin.email);
        }
        Command::Stats { db, pricing } => {
            let conn = open(&db).await?;
            let stats = admin::dashboard(&conn, &pricing).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
