pub use controller::*;
use clap::Parser;
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

use actix_web::{
    HttpRequest, HttpResponse, HttpServer, Responder, get, middleware,
    web::Data,
};

#[get("/metrics")]
async fn metrics(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(metrics)
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = config::Settings::parse();

    // Setup tracing layers
    let logger = tracing_subscriber::fmt::layer();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| Error::Other(e.to_string()))?;
    let collector = Registry::default().with(logger).with(env_filter);

    // Initialize tracing
    tracing::subscriber::set_global_default(collector).map_err(|e| Error::Other(e.to_string()))?;

    // Start kubernetes controller
    let listen = settings.listen.clone();
    let (manager, controller) = Manager::new(settings).await?;

    // Start web server
    let server = HttpServer::new(move || {
        actix_web::App::new()
            .app_data(Data::new(manager.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(&listen)?
    .shutdown_timeout(5);

    tokio::select! {
        _ = controller => tracing::warn!("App controller exited"),
        _ = server.run() => tracing::info!("actix exited"),
    }
    Ok(())
}
