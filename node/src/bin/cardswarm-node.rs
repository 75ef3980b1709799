#![warn(rust_2018_idioms)]

use std::str::FromStr;
use std::sync::Arc;

use flexi_logger::{LogSpecBuilder, LoggerHandle};
use futures::channel::mpsc;
use futures::future::{select, Either};
use futures::pin_mut;
use futures::prelude::*;
use log::{error, info, warn, LevelFilter};
use tokio::sync::oneshot;

use cardswarm_game::Catalog;
use cardswarm_node::{settings, sim, FileKeyStore, NodeOptions};
use cardswarm_swarm::{topic, Identity, KeyStore, MemoryKeyStore, DEFAULT_SEED};

fn main() -> anyhow::Result<()> {
    let settings = settings::load()?;
    let _logger = setup_logger(&settings.logging)?;
    let mut signal_rx = setup_signal()?;
    let runtime = setup_runtime(&settings.runtime)?;
    let catalog = Arc::new(load_catalog(&settings.catalog)?);
    let identity = load_identity(&settings.identity)?;
    info!(
        "{} joining game {:?} (topic {})",
        identity.id().short(),
        settings.player.game_key,
        topic(DEFAULT_SEED, &settings.player.game_key)
    );

    let options = NodeOptions::from(&settings.player);
    let simulation = settings.simulation;
    let report = runtime.block_on(async move {
        // Spin up the swarm.
        let (stop_tx, stop_rx) = oneshot::channel();
        let swarm = tokio::spawn(sim::run(simulation, identity, options, catalog, stop_rx));
        // Forward receiving signal to the stop notification.
        let signal = async move {
            signal_rx.next().await;
            info!("sending shutdown notice");
            let _ = stop_tx.send(());
        };
        pin_mut!(signal);
        // Wait either for the signal, or for the swarm to finish its rounds.
        match select(signal, swarm).await {
            Either::Left((_, swarm)) => swarm.await,
            Either::Right((report, _)) => report,
        }
    });

    match report {
        Ok(report) => info!(
            "played {} rounds; host saw {} connections",
            report.rounds, report.host.connections
        ),
        Err(e) => error!("swarm task: {}", e),
    }
    info!("good-bye, world!");
    Ok(())
}

fn setup_logger(l: &settings::Logging) -> anyhow::Result<LoggerHandle> {
    let mut spec_builder = LogSpecBuilder::new();
    spec_builder.default(LevelFilter::from_str(&l.level)?);
    let spec = spec_builder.build();
    let handle = flexi_logger::Logger::with(spec)
        .format(flexi_logger::default_format)
        .start()?;
    Ok(handle)
}

fn setup_signal() -> anyhow::Result<mpsc::UnboundedReceiver<()>> {
    let (signal_tx, signal_rx) = mpsc::unbounded();
    ctrlc::set_handler(move || {
        info!("received interrupt signal");
        let _ = signal_tx.unbounded_send(());
    })?;
    Ok(signal_rx)
}

fn setup_runtime(r: &settings::Runtime) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = if r.threaded {
        let worker_threads = if r.worker_threads == 0 {
            warn!("worker_threads must be at least 1; adjusting to 1");
            1
        } else {
            r.worker_threads
        };
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.worker_threads(worker_threads);
        builder
    } else {
        tokio::runtime::Builder::new_current_thread()
    };
    builder.enable_all().thread_name(r.thread_name.clone());
    Ok(builder.build()?)
}

fn load_catalog(c: &settings::Catalog) -> anyhow::Result<Catalog> {
    Ok(match &c.path {
        Some(path) => {
            let catalog = Catalog::load(path)?;
            info!(
                "loaded {} white and {} black cards from {}",
                catalog.white().len(),
                catalog.black().len(),
                path.display()
            );
            catalog
        }
        None => {
            info!("no catalog configured; using placeholder cards");
            Catalog::placeholder()
        }
    })
}

fn load_identity(i: &settings::Identity) -> anyhow::Result<Identity> {
    let mut store: Box<dyn KeyStore> = match &i.key_path {
        Some(path) => Box::new(FileKeyStore::new(path)),
        None => Box::new(MemoryKeyStore::default()),
    };
    Ok(Identity::load_or_generate(store.as_mut())?)
}
