//! Entry point: discovers configuration, wires the route table, dispatcher,
//! TLS front end, plaintext redirect listener, filesystem watcher, and
//! optional management API together, and runs them all until the process is
//! killed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use satellite_core::config::Config;
use satellite_core::geo::{GeoOracle, MaxMindGeoOracle, NoGeoOracle};
use satellite_core::ip::IpRangeEntry;
use satellite_core::{ClientLedger, HitCounter, RouteTable};
use satellite_server::Dispatcher;

/// Satellite: a discriminating HTTPS payload host.
#[derive(Parser)]
#[command(name = "satellite")]
#[command(about = "TLS-terminating payload host with condition-gated routes", long_about = None)]
struct Cli {
    /// Path to a config.yml, overriding the default discovery order.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::discover().context("discovering config.yml")?,
    };

    env_logger::Builder::new()
        .filter_level(config.log_level_filter())
        .init();

    info!("server_root = {}", config.server_root.display());

    let manifest_path = config.server_root.join("pathList.yml");
    let table = Arc::new(
        RouteTable::load(
            config.server_root.clone(),
            manifest_path.clone(),
            config.global_conditions_path.clone(),
        )
        .context("loading route table")?,
    );

    let ledger = Arc::new(ClientLedger::new());

    let db_path = config.server_root.join(".satellite-counters");
    let counter = Arc::new(HitCounter::open_sled(&db_path).context("opening hit counter store")?);

    let geo: Arc<dyn GeoOracle> = match &config.geoip_path {
        Some(path) => Arc::new(MaxMindGeoOracle::open(path).context("opening geoip database")?),
        None => Arc::new(NoGeoOracle),
    };

    let dispatcher = Arc::new(Dispatcher {
        table: table.clone(),
        ledger,
        counter: counter.clone(),
        geo,
        config: config.clone(),
    });

    let _watcher = satellite_watch::RouteWatcher::spawn(
        table.clone(),
        &manifest_path,
        config.global_conditions_path.clone(),
        satellite_watch::DEFAULT_DEBOUNCE,
    )
    .context("starting route watcher")?;

    let listen_addr: SocketAddr = config.listen.parse().context("parsing listen address")?;

    let ssl = config
        .ssl
        .as_ref()
        .context("ssl.cert and ssl.key must be set to serve HTTPS")?;
    let tls_config = satellite_server::tls::load_server_config(&ssl.cert, &ssl.key)
        .context("loading TLS certificate/key")?;

    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn(async move {
        if let Err(e) = satellite_server::http_server::serve(listen_addr, tls_config, dispatcher).await {
            error!("tls listener exited: {e}");
        }
    });

    if config.redirect_http {
        let redirect_addr = SocketAddr::new(listen_addr.ip(), 80);
        tasks.spawn(async move {
            if let Err(e) = satellite_server::redirect_listener::serve(redirect_addr).await {
                error!("redirect listener exited: {e}");
            }
        });
    }

    if let Some(management) = config.management.clone() {
        let allowed: IpRangeEntry = management
            .ip
            .parse()
            .map_err(|e: String| anyhow::anyhow!("invalid management.ip {:?}: {e}", management.ip))?;
        let state = actix_web::web::Data::new(satellite_api::handlers::ManagementState {
            table: table.clone(),
            counter: counter.clone(),
        });
        // The management API is a separate actix-web server (spec §4.10 only
        // specifies a URI prefix, not a port) since it speaks plain HTTP
        // behind its own IP gate rather than riding the hyper/rustls front
        // end. It binds the same address as the main listener, one port up,
        // by convention (documented in DESIGN.md).
        let mgmt_addr = SocketAddr::new(listen_addr.ip(), listen_addr.port() + 1);
        let mgmt_path = management.path.clone();

        tasks.spawn(async move {
            let result = actix_web::HttpServer::new(move || {
                actix_web::App::new().service(satellite_api::management_scope(
                    &mgmt_path,
                    allowed.clone(),
                    state.clone(),
                ))
            })
            .bind(mgmt_addr);
            match result {
                Ok(server) => {
                    if let Err(e) = server.run().await {
                        error!("management api exited: {e}");
                    }
                }
                Err(e) => error!("failed to bind management api: {e}"),
            }
        });
    } else {
        warn!("no management API configured");
    }

    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            error!("task panicked: {e}");
        }
    }

    Ok(())
}
