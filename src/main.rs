use std::process;
use std::sync::Arc;

use dotenvy::dotenv;
use log::{error, info};
use pingora_core::server::Server;
use pingora_proxy::http_proxy_service;
use structopt::StructOpt;

mod backend;
mod config;
mod exclusion;
mod health_check;
mod proxy;
mod router;
#[cfg(test)]
mod testing;
mod wake;

use backend::BackendStates;
use config::Config;
use health_check::HttpProber;
use proxy::{Upstream, WakeProxy};
use router::Router;
use wake::UdpWaker;

#[derive(StructOpt, Debug)]
#[structopt(name = "wol-proxy")]
struct Args {
    /// Path to the configuration file (TOML, or YAML for .yaml/.yml)
    #[structopt(default_value = "config.toml")]
    config: String,
}

fn main() {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::from_args();

    let config = match Config::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("❌ Failed to load config file {}: {}", args.config, e);
            process::exit(1);
        }
    };

    let upstream = match Upstream::parse(&config.general.destination) {
        Ok(upstream) => upstream,
        Err(e) => {
            error!("❌ {}", e);
            process::exit(1);
        }
    };

    let mut server = match Server::new(None) {
        Ok(server) => server,
        Err(e) => {
            error!("❌ Failed to create server: {}", e);
            process::exit(1);
        }
    };
    server.bootstrap();

    let states = BackendStates::from_config(&config);
    let router = Router::new(
        config.clone(),
        states,
        Arc::new(HttpProber::new()),
        Arc::new(UdpWaker),
    );

    let listen = config.listen_addr();
    let mut proxy_service = http_proxy_service(&server.configuration, WakeProxy::new(router, upstream));
    proxy_service.add_tcp(&listen);
    server.add_service(proxy_service);

    info!("🚀 Proxy listening on {}", listen);
    info!("🎯 Forwarding to: {}", config.general.destination);
    info!(
        "🔑 Host keyword: '{}', cache window: {}s",
        config.general.main_host_keyword, config.general.cache_secs
    );
    for (name, backend) in &config.backends {
        info!(
            "   - backend {} -> {} (wake {})",
            name,
            backend.destination,
            if backend.wol_enabled { "ON" } else { "OFF" }
        );
    }

    server.run_forever();
}
