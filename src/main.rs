mod config;
mod errors;
mod guard;
mod logging;
mod payments;
mod security;
mod server;
mod services;
mod store;

use crate::{config::Config, payments::HttpPaymentGateway, server::AppState, store::InMemoryStore};
use anyhow::Context;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("billing.toml");
    let mut issue_for: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() { eprintln!("--config requires a path"); std::process::exit(2); }
                config_path = PathBuf::from(&args[i]);
            }
            "issue-token" => {
                i += 1;
                if i >= args.len() { eprintln!("issue-token requires a subject id"); std::process::exit(2); }
                issue_for = Some(args[i].clone());
            }
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
        i += 1;
    }

    let secret = Config::secret_from_env().context("loading signing secret")?;

    let mut cfg = Config::load(&config_path).context("loading config")?;
    cfg.apply_env();
    cfg.validate().context("validating config")?;
    let settings = cfg.settings(&secret).context("preparing storage roots")?;

    if let Some(subject) = issue_for {
        let token = settings.tokens.issue(&subject).context("issuing token")?;
        println!("{token}");
        return Ok(());
    }

    let gateway = HttpPaymentGateway::new(
        cfg.payments.endpoint_template.clone(),
        Duration::from_secs(cfg.payments.timeout_s),
    )?;
    let store = InMemoryStore::seeded(&cfg.seed);
    let addr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port);

    info!(
        addr = %addr,
        uploads = %settings.uploads.root().display(),
        receipts = %settings.receipts.root().display(),
        users = cfg.seed.users.len(),
        invoices = cfg.seed.invoices.len(),
        "billing-vault ready"
    );

    let state = AppState::new(cfg, settings, store, Arc::new(gateway));
    server::serve(state).await
}
