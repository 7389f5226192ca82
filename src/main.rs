// ============================================================================
// JIMM - JUJU INTELLIGENT MODEL MANAGER
// ============================================================================
// Ponto de entrada: carrega a configuração, monta as dependências (banco,
// Vault, OpenFGA, pool de conexões Juju) e sobe o servidor HTTP/websocket
// junto com as tarefas de fundo (monitor e rotação de JWKS).

use std::process::ExitCode;
use std::sync::Arc;

use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod application;
mod auth;
mod domain;
mod infra;
mod infrastructure;
mod jujuapi;
mod jwt;
mod monitor;
mod permissions;
mod presentation;
mod shared;

use auth::oidc::{OidcClient, OidcConfig};
use auth::{AuthenticationService, SessionTokens};
use domain::repositories::*;
use infra::openfga::{OpenFgaClient, OpenFgaConfig, RelationStore};
use infra::vault::{SecretStore, VaultClient};
use infrastructure::repositories::*;
use jujuapi::ConnectionPool;
use jwt::{JwksService, JwtService};
use permissions::Authorizer;
use presentation::facades::Registry;
use shared::Config;

// ============================================================================
// APP STATE - DEPENDENCY INJECTION CONTAINER
// ============================================================================

pub struct AppState {
    pub pg: sqlx::Pool<sqlx::Postgres>,
    pub config: Config,
    pub secrets: Arc<dyn SecretStore>,
    pub relations: Arc<dyn RelationStore>,

    pub identities: Arc<dyn IdentityRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub clouds: Arc<dyn CloudRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub controllers: Arc<dyn ControllerRepository>,
    pub models: Arc<dyn ModelRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub acls: Arc<dyn AclRepository>,

    pub authorizer: Arc<Authorizer>,
    pub auth: Arc<AuthenticationService>,
    pub jwks: Arc<JwksService>,
    pub jwt: Arc<JwtService>,
    pub pool: ConnectionPool,
    pub registry: Arc<Registry>,
    pub started_at: DateTime<Utc>,
}

/// `api-addr` may come as `:17070`; normalize to a bindable address.
fn normalize_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{}", port)
    } else {
        addr.to_string()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("JIMM_CONFIG").ok())
        .unwrap_or_else(|| "config.yaml".to_string());

    // Exit code 1: configuration error.
    let config = match Config::read(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("STOP {}", e);
            return ExitCode::from(1);
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer().json();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging_level()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    // Exit code 2: unrecoverable runtime error.
    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal runtime error");
            ExitCode::from(2)
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    // ===== DATABASE =====
    let pg = infra::pg::pool(config.database_addr(), config.max_sessions()).await?;
    infra::pg::migrate(&pg).await?;

    // ===== SECRET STORE (VAULT) =====
    let vault = VaultClient::from_env()?;
    match vault.health_check().await {
        Ok(true) => tracing::info!("vault connected"),
        Ok(false) => tracing::warn!("vault reports unhealthy; continuing"),
        Err(e) => tracing::warn!(error = %e, "vault health check failed; continuing"),
    }
    let secrets: Arc<dyn SecretStore> = Arc::new(vault);

    // ===== RELATION STORE (OPENFGA) =====
    let relations: Arc<dyn RelationStore> =
        Arc::new(OpenFgaClient::new(OpenFgaConfig::default())?);

    // ===== REPOSITORIES =====
    let identities: Arc<dyn IdentityRepository> =
        Arc::new(PostgresIdentityRepository::new(pg.clone()));
    let groups: Arc<dyn GroupRepository> = Arc::new(PostgresGroupRepository::new(pg.clone()));
    let clouds: Arc<dyn CloudRepository> = Arc::new(PostgresCloudRepository::new(pg.clone()));
    let credentials: Arc<dyn CredentialRepository> =
        Arc::new(PostgresCredentialRepository::new(pg.clone()));
    let controllers: Arc<dyn ControllerRepository> =
        Arc::new(PostgresControllerRepository::new(pg.clone()));
    let models: Arc<dyn ModelRepository> = Arc::new(PostgresModelRepository::new(pg.clone()));
    let offers: Arc<dyn OfferRepository> = Arc::new(PostgresOfferRepository::new(pg.clone()));
    let audit: Arc<dyn AuditLogRepository> =
        Arc::new(PostgresAuditLogRepository::new(pg.clone()));
    let sessions: Arc<dyn SessionRepository> =
        Arc::new(PostgresSessionRepository::new(pg.clone()));
    let acls: Arc<dyn AclRepository> = Arc::new(PostgresAclRepository::new(pg.clone()));

    // The admin ACL is self-administered; seed it with the configured
    // controller admins on first start.
    if acls
        .get(presentation::acl_controller::ADMIN_ACL)
        .await?
        .is_none()
    {
        acls.set(
            presentation::acl_controller::ADMIN_ACL,
            &config.controller_admins(),
        )
        .await?;
    }

    // ===== AUTHORIZATION KERNEL =====
    let authorizer = Arc::new(Authorizer::new(
        relations.clone(),
        config.controller_uuid(),
        config.controller_admins(),
    ));

    // ===== JWKS + JWT =====
    let jwks = Arc::new(JwksService::new(secrets.clone()));
    let jwt = Arc::new(JwtService::new(jwks.clone(), config.public_host()));

    // ===== AUTHENTICATION =====
    let oidc = Arc::new(
        OidcClient::discover(OidcConfig {
            issuer: config.identity_location().to_string(),
            client_id: std::env::var("JIMM_OAUTH_CLIENT_ID").unwrap_or_else(|_| "jimm".into()),
            client_secret: std::env::var("JIMM_OAUTH_CLIENT_SECRET").unwrap_or_default(),
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
        })
        .await?,
    );
    let tokens = Arc::new(SessionTokens::new(secrets.clone(), config.public_host()));
    let auth = Arc::new(AuthenticationService::new(
        oidc,
        identities.clone(),
        sessions.clone(),
        tokens,
        config.dashboard_url(),
    ));

    // ===== CONNECTION POOL =====
    let dial_timeout = std::env::var("JIMM_API_OPEN_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);
    let pool = ConnectionPool::new(
        secrets.clone(),
        controllers.clone(),
        tokio::time::Duration::from_secs(dial_timeout),
    );

    let state = Arc::new(AppState {
        pg: pg.clone(),
        config,
        secrets: secrets.clone(),
        relations,
        identities,
        groups,
        clouds,
        credentials: credentials.clone(),
        controllers: controllers.clone(),
        models: models.clone(),
        audit,
        acls,
        authorizer,
        auth,
        jwks: jwks.clone(),
        jwt,
        pool: pool.clone(),
        registry: Arc::new(Registry::new()),
        started_at: Utc::now(),
    });

    // ===== BACKGROUND TASKS =====
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let rotator = tokio::spawn(jwks.clone().run_rotator(shutdown_rx.clone()));

    let run_monitor = std::env::var("JIMM_RUN_MONITOR")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);
    let monitor_task = if run_monitor {
        let deps = monitor::MonitorDeps {
            controllers: controllers.clone(),
            models: models.clone(),
            offers,
            credentials,
            secrets,
            pool: pool.clone(),
        };
        let owner = monitor::owner_id(state.config.agent_username());
        let mon = monitor::Monitor::new(deps, monitor::MonitorConfig::default(), owner);
        Some(tokio::spawn(mon.run(shutdown_rx.clone())))
    } else {
        None
    };

    // ===== CORS =====
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            Method::DELETE,
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::POST,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers(vec![header::WWW_AUTHENTICATE])
        .max_age(std::time::Duration::from_secs(600));

    // ===== METRICS =====
    let (prometheus_layer, metric_handle) = axum_prometheus::PrometheusMetricLayer::pair();
    let metrics_router = Router::new().route(
        "/metrics",
        get(move || {
            let handle = metric_handle.clone();
            async move { handle.render().into_response() }
        }),
    );

    // ===== ROUTER =====
    let app = Router::new()
        .route("/health", get(|| async { (StatusCode::OK, "ok") }))
        .route(
            "/ready",
            get({
                let state = state.clone();
                move || {
                    let state = state.clone();
                    async move {
                        let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
                            .fetch_one(&state.pg)
                            .await
                            .is_ok();
                        let jwks_ok = matches!(state.jwks.current().await, Ok(Some(_)));
                        if db_ok && jwks_ok {
                            (StatusCode::OK, "ok").into_response()
                        } else {
                            let mut msg = String::new();
                            if !db_ok {
                                msg.push_str("db_down;");
                            }
                            if !jwks_ok {
                                msg.push_str("jwks_missing;");
                            }
                            (StatusCode::SERVICE_UNAVAILABLE, msg).into_response()
                        }
                    }
                }
            }),
        )
        .merge(metrics_router)
        .merge(presentation::routes())
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(cors)
        .with_state(state.clone());

    let addr = normalize_addr(state.config.api_addr());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    // Shut down the background tasks; monitor workers release their leases.
    let _ = shutdown_tx.send(true);
    if let Some(task) = monitor_task {
        let _ = task.await;
    }
    rotator.abort();
    pool.close_all();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_addr() {
        assert_eq!(normalize_addr(":17070"), "0.0.0.0:17070");
        assert_eq!(normalize_addr("0.0.0.0:8080"), "0.0.0.0:8080");
    }
}
