use std::sync::Arc;

use oalearn::{
    app,
    config::AppConfig,
    db::{self, ConnectionManager},
    seed,
    users::{PgUserStore, UserStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    app::init_tracing("oalearn=info,seed=info,sqlx=warn");

    let config = AppConfig::from_env()?;
    let manager = ConnectionManager::postgres(config.database);

    let handle = manager.connect().await?;
    if let Err(e) = db::migrate(&handle).await {
        tracing::error!(error = %e, "migration failed");
        manager.disconnect().await;
        return Err(e.into());
    }
    drop(handle);

    let report = seed::run_seed(&manager, |handle| {
        Arc::new(PgUserStore::new(handle.pool().clone())) as Arc<dyn UserStore>
    })
    .await?;

    if !report.is_success() {
        for (email, reason) in &report.failed {
            tracing::error!(%email, %reason, "account not seeded");
        }
        std::process::exit(1);
    }
    Ok(())
}
