use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use jiangzao_server::access::handlers as access_handlers;
use jiangzao_server::bargain::handlers as bargain_handlers;
use jiangzao_server::config::Settings;
use jiangzao_server::membership::handlers as membership_handlers;
use jiangzao_server::payment::handlers as payment_handlers;
use jiangzao_server::{health_check, AppError, AppState};
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> jiangzao_server::Result<()> {
    dotenv().ok();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = Settings::new()?;
    info!("Configuration loaded successfully");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    info!("Database pool established");

    sqlx::migrate!("./migrations").run(&db_pool).await?;
    info!("Migrations applied");

    info!(
        "Starting server at {}:{}",
        config.server.host, config.server.port
    );
    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;

    let workers = config.server.workers as usize;
    let is_production = config.is_production();
    let site_url = config.zpay.site_url.clone();
    let state = web::Data::new(AppState::new(config, db_pool)?);

    HttpServer::new(move || {
        let cors = if is_production {
            Cors::default()
                .allowed_origin(&site_url)
                .allowed_methods(vec!["GET", "POST"])
                .allowed_headers(vec!["Authorization", "Content-Type"])
                .supports_credentials()
                .max_age(3600)
        } else {
            Cors::permissive()
        };

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .route(
                "/api/content/access",
                web::post().to(access_handlers::resolve_access),
            )
            .route(
                "/api/content/track-view",
                web::post().to(access_handlers::track_view),
            )
            .route(
                "/api/user/reading-stats",
                web::get().to(access_handlers::reading_stats),
            )
            .route(
                "/api/user/membership",
                web::get().to(membership_handlers::get_membership),
            )
            .route(
                "/api/membership/plans",
                web::get().to(membership_handlers::list_plans),
            )
            .route(
                "/api/user/membership/cancel",
                web::post().to(membership_handlers::cancel_membership),
            )
            .route(
                "/api/bargain/submit",
                web::post().to(bargain_handlers::submit),
            )
            .route(
                "/api/bargain/status",
                web::get().to(bargain_handlers::status),
            )
            .route(
                "/api/payment/create-order",
                web::post().to(payment_handlers::create_order),
            )
            .route(
                "/api/payment/callback",
                web::get().to(payment_handlers::callback_get),
            )
            .route(
                "/api/payment/callback",
                web::post().to(payment_handlers::callback_post),
            )
            .route(
                "/api/payment/check-status/{order_id}",
                web::get().to(payment_handlers::check_status),
            )
            .route(
                "/api/user/orders",
                web::get().to(payment_handlers::list_orders),
            )
    })
    .listen(listener)?
    .workers(workers)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok(())
}
