use clap::Parser;
use model::{auth, db, init_logging, pricing};

mod app;
mod routes;

#[cfg(test)]
mod test_runner;

/// Start the grocery store server.
#[derive(Clone, Debug, Parser)]
struct Options {
    /// The port where the app should be served.
    #[clap(short, long, env = "GROCER_PORT", default_value = "80")]
    port: u16,

    /// Email of an administrator account to create or promote at startup.
    #[clap(long, env = "GROCER_ADMIN_EMAIL", requires = "admin_password")]
    admin_email: Option<String>,

    /// Password for the administrator account given by `--admin-email`.
    #[clap(long, env = "GROCER_ADMIN_PASSWORD", requires = "admin_email")]
    admin_password: Option<String>,

    #[clap(flatten)]
    db: db::Options,

    #[clap(flatten)]
    auth: auth::Options,

    #[clap(flatten)]
    pricing: pricing::Options,
}

impl Options {
    async fn serve(self) -> tide::Result<()> {
        let conn = self.db.connect().await?;
        if let (Some(email), Some(password)) = (&self.admin_email, &self.admin_password) {
            auth::ensure_admin(&conn, "Administrator", email, password).await?;
        }
        let app = app::app(app::State {
            conn,
            auth: self.auth,
            pricing: self.pricing,
        });
        tracing::info!("listening on port {}", self.port);
        app.listen(format!("0.0.0.0:{}", self.port)).await?;
        Ok(())
    }
}

#[async_std::main]
async fn main() -> tide::Result<()> {
    init_logging();
    Options::parse().serve().await
}
