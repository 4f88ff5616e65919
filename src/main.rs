use dashmap::DashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

use wirechat_server::config::{generate_config_template, Config};
use wirechat_server::media::LocalMediaStore;
use wirechat_server::{auth, db, routes, state, ws};

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wirechat_server=info".parse().unwrap());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json_logs {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    init_tracing(config.json_logs);
    tracing::info!("wirechat server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let media_config = config.media.clone().unwrap_or_default();
    let media_store = Arc::new(LocalMediaStore::new(&config.data_dir, &media_config));

    // Presence starts empty on every boot: whoever is connected right now
    // is online, nothing else.
    let app_state = state::AppState {
        db,
        jwt_secret,
        rooms: ws::new_room_registry(),
        presence: Arc::new(DashMap::new()),
        media: media_store,
        max_upload_size_mb: media_config.max_upload_size_mb,
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
