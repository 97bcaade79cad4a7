// Jackson Coxson

use std::sync::Arc;

use log::error;
use tcp_proxy::{LogSink, Proxy, ProxyConfig};

static USAGE: &str = "tcp_proxy <config.json> | <local> [<local> ...] <remote>";

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .format_timestamp_micros()
        .init();

    let config = match ProxyConfig::load() {
        Ok(c) => c,
        Err(e) => {
            error!("{e}\nusage: {USAGE}");
            std::process::exit(1);
        }
    };

    let running = match Proxy::new(config, Arc::new(LogSink)).start().await {
        Ok(r) => r,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    running.wait().await;
}
