use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sockschain::{ChainSet, Config, ListenAddr, Settings, Supervisor};

#[derive(Clone, Debug, clap::Parser)]
#[command(version)]
struct Opt {
    /// TOML configuration file (JSON if the name ends in .json)
    #[arg(long, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// overrides [server] host/port, e.g. 127.0.0.1:1080 or [::1]:1080
    #[arg(long)]
    listen: Option<ListenAddr>,

    /// validate the configuration, print it as JSON and exit
    #[arg(long)]
    check: bool,
}

fn describe(listen: &ListenAddr, chains: &ChainSet, settings: &Settings) -> serde_json::Value {
    let chains: Vec<Vec<String>> = chains
        .iter()
        .map(|chain| chain.entries().iter().map(|hop| hop.to_string()).collect())
        .collect();
    serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "listen": listen.to_string(),
        "chains": chains,
        "timeouts": {
            "connect": settings.connect_timeout.as_secs(),
            "handshake": settings.handshake_timeout.as_secs(),
            "shutdown_grace": settings.shutdown_grace.as_secs(),
        },
    })
}

async fn async_main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    log::debug!("{opt:?}");

    let config = Config::from_file(&opt.config)
        .await
        .with_context(|| format!("cannot load {:?}", opt.config))?;
    let (mut listen, chains, settings) = config.into_parts()?;
    if let Some(overridden) = opt.listen {
        listen = overridden;
    }

    let info = describe(&listen, &chains, &settings);
    println!("{info:#}"); // pretty JSON
    if opt.check {
        return Ok(());
    }

    let (stop_tx, stop_rx) = smol::channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    let supervisor = Supervisor::bind((listen.host.as_str(), listen.port), chains, settings)
        .await
        .with_context(|| format!("cannot listen on {listen}"))?;
    log::info!("listening on {}", supervisor.local_addr()?);

    supervisor
        .run_until(async {
            let _ = stop_rx.recv().await;
            log::info!("interrupted, shutting down");
        })
        .await?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    smol::block_on(async_main())
}
