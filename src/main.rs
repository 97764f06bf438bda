mod app;
mod auth;
mod connector;
mod error;
mod eventlog;
mod guard;
mod keys;
mod line_editor;
mod motd;
mod server;
mod session;
mod text;

use app::App;
use auth::Authenticator;
use clap::Parser;
use eventlog::EventLog;
use russh::server::Server as _;
use server::SshServerHandler;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::builder()
        .parse_env(env_logger::Env::default())
        .filter_level(log::LevelFilter::Info)
        .filter_module("russh", log::LevelFilter::Info)
        .init();

    let app = App::parse();
    log::info!("rule file: {}", app.rule_file.display());
    log::info!("backend target: {}:{}", app.backend_host, app.backend_port);
    log::info!("host key: {}", app.host_key.display());
    log::info!("event log: {}", app.log_file.display());

    let host_key = match keys::load_or_generate(&app.host_key) {
        Ok(key) => key,
        Err(err) => {
            log::error!("fatal: failed to load or generate host key: {err}");
            std::process::exit(1);
        }
    };

    let authenticator = Arc::new(Authenticator::load(&app.rule_file));
    let event_log = Arc::new(EventLog::new(app.log_file.clone()));
    let hostname = app::hostname();

    let config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        methods: russh::MethodSet::PASSWORD,
        ..Default::default()
    });

    let mut server_handler = SshServerHandler::new(
        authenticator,
        event_log,
        app.backend_host.clone(),
        app.backend_port,
        hostname,
        app.interface,
        app.motd_file.clone(),
    );

    log::info!("gossh dispatcher listening on {}", app.interface);
    if let Err(err) = server_handler.run_on_address(config, app.interface).await {
        log::error!("fatal: server exited: {err}");
        std::process::exit(1);
    }
}
