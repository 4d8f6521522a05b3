// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use stickerhub::config::HubConfig;

fn init_tracing(config: &HubConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over --log-level when set.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

#[tokio::main]
async fn main() {
    let config = HubConfig::parse();
    init_tracing(&config);

    // reqwest is built without a default TLS provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = stickerhub::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
