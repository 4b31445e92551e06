use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use access_manager::storage::{CredentialError, Database};
use access_manager::{api, auth, config::Config, expiration, AppState};

/// Permission codes granted to the bootstrap administrator role
const ADMIN_PERMISSIONS: &[&str] = &[
    "USER:CREATE",
    "USER:VIEW",
    "USER:FORCE_LOGOUT",
    "ROLE:CREATE",
    "ROLE:UPDATE",
    "ROLE:VIEW",
    "PERMISSION:CREATE",
    "PERMISSION:UPDATE",
    "PERMISSION:VIEW",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "access-manager starting"
    );

    // Load configuration
    let config = Config::load()?;

    // Initialize database
    let db = Database::open(&config.server.data_dir)?;
    info!("Database opened at: {}", config.server.data_dir);

    // Provision the initial administrator, if configured
    bootstrap_admin(&db)?;

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
    });

    // Start the background expiration cleaner
    let expiration_handle = expiration::start_expiration_cleaner(Arc::clone(&state));

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!("Listening on: {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: abort background tasks
    info!("Shutting down background tasks");
    expiration_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

/// Create the initial administrator account from `BOOTSTRAP_ADMIN_USERNAME`
/// and `BOOTSTRAP_ADMIN_PASSWORD`, if both are set and the account does not
/// already exist. Every other account is managed through the API.
fn bootstrap_admin(db: &Database) -> anyhow::Result<()> {
    let (Ok(username), Ok(password)) = (
        std::env::var("BOOTSTRAP_ADMIN_USERNAME"),
        std::env::var("BOOTSTRAP_ADMIN_PASSWORD"),
    ) else {
        return Ok(());
    };

    if db.find_user_by_username(&username)?.is_some() {
        return Ok(());
    }

    let user_id = auth::service::register(db, &username, &password)?;

    let role = match db.find_role_by_name("ADMIN")? {
        Some(role) => role,
        None => db.create_role("ADMIN", Some("Administration"))?,
    };

    for code in ADMIN_PERMISSIONS {
        let permission = match db.find_permission_by_code(code)? {
            Some(permission) => permission,
            None => db.create_permission(code, code)?,
        };

        match db.assign_permission_to_role(role.id, permission.id) {
            Ok(()) | Err(CredentialError::RolePermissionExists) => {}
            Err(e) => return Err(e.into()),
        }
    }

    db.assign_role_to_user(user_id, role.id)?;
    info!(user_id, "Bootstrap administrator created");
    Ok(())
}
