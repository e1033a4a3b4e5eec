use oalearn::{app, config::AppConfig, db, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    app::init_tracing("oalearn=debug,axum=info,tower_http=info");

    let config = AppConfig::from_env()?;
    let (host, port) = (config.host.clone(), config.port);
    let app_state = AppState::init(config);

    // Run migrations if the database is reachable at startup
    if let Some(handle) = db::init_database(&app_state.db).await {
        if let Err(e) = db::migrate(&handle).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }
    }

    let router = app::build_app(app_state);
    app::serve(router, &host, port).await
}
