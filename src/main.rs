use actix_web::{middleware, web, App, HttpServer};
use log::{error, info, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

use strongbox::api;
use strongbox::app_state::AppState;
use strongbox::config::AppConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config);

    let state = match AppState::from_config(config.clone()) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize storage engine: {}", e);
            std::process::exit(1);
        }
    };
    // Idempotent admin bootstrap; anything but "already exists" is fatal.
    if let Err(e) = state.bootstrap_admin() {
        error!("Failed to bootstrap admin repository: {}", e);
        std::process::exit(1);
    }

    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting strongbox on {}:{}", bind.0, bind.1);

    let app_state = web::Data::new(state);
    let max_payload = config.server.max_upload_bytes as usize;
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(app_state.clone())
            .app_data(web::PayloadConfig::default().limit(max_payload))
            .configure(api::configure)
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}

/// Initialize log4rs from the configured file, falling back to a console
/// appender when the file is absent.
fn init_logging(config: &AppConfig) {
    let file = &config.logging.config_file;
    if Path::new(file).exists() {
        if let Err(e) = log4rs::init_file(file, Default::default()) {
            eprintln!("Failed to initialize logging from {}: {}", file, e);
        }
        return;
    }

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}",
        )))
        .build();
    let fallback = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .expect("default logging config is valid");
    if let Err(e) = log4rs::init_config(fallback) {
        eprintln!("Failed to initialize fallback logging: {}", e);
    }
}
