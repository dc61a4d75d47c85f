use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use neuroscan::auth::jwt::JwtService;
use neuroscan::auth::middleware::AuthMiddleware;
use neuroscan::config::AppConfig;
use neuroscan::db::repository::ClinicRepository;
use neuroscan::inference::classifier::ClassifierAdapter;
use neuroscan::inference::pipeline::{ScanPipeline, ScanService};
use neuroscan::inference::preprocess::Preprocessor;
use neuroscan::inference::validator::BrainImageValidator;
use neuroscan::inference::default_loader;
use neuroscan::routes::configure_routes;
use neuroscan::storage::upload_store::UploadStore;
use std::env;
use std::io::Error;
use std::sync::Arc;
use std::time::Duration;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::load().map_err(Error::other)?;
    if config.uses_default_secret() {
        log::warn!("JWT_SECRET is not set; sessions are signed with the development secret");
    }

    let repository = ClinicRepository::connect(&config.database.url)
        .await
        .map_err(Error::other)?;
    repository.init_schema().await.map_err(Error::other)?;
    log::info!("Database ready at {}", config.database.url);

    let upload_store = UploadStore::new(&config.uploads);
    upload_store.ensure_root().map_err(Error::other)?;

    let preprocessor = Arc::new(Preprocessor::new(
        config.preprocessing,
        BrainImageValidator::new(config.validator),
    ));
    let classifier = Arc::new(ClassifierAdapter::new(default_loader(&config)));
    let pipeline = Arc::new(ScanPipeline::new(preprocessor, classifier));
    let scan_service = ScanService::new(
        pipeline,
        Duration::from_secs(config.model.inference_timeout_secs),
    );

    let warm_up = scan_service.clone();
    let load_timeout = Duration::from_secs(config.model.load_timeout_secs);
    actix_web::rt::spawn(async move {
        if warm_up.warm_up(load_timeout).await {
            log::info!("Model ready");
        } else {
            log::warn!("Model not available yet; predictions will report it");
        }
    });

    let jwt_service = JwtService::new(&config.auth.jwt_secret, config.auth.session_days);
    let auth_middleware = AuthMiddleware::new(jwt_service.clone());

    let static_dir = config.server.static_dir.clone();
    let bind_address = format!("{}:{}", config.server.host, config.server.port);

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(repository.clone()))
            .app_data(web::Data::new(upload_store.clone()))
            .app_data(web::Data::new(scan_service.clone()))
            .app_data(web::Data::new(jwt_service.clone()))
            .configure(|cfg| configure_routes(cfg, static_dir.clone(), auth_middleware.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
