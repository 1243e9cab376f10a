use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::*;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use accum::params::TREE_DEPTH;
use anchor::{AnchorContract, LocalAnchor, MemoryStore};
use circuit::params::BATCH_SIZE;
use circuit::{BatchProver, BatchVerifier, Halo2Prover, Halo2Verifier, MockBackend, MockVerifier};
use operator::{
    request_shutdown, DevnetConfig, DevnetLedger, JsonBlockDecoder, OperatorConfig, ProverKind, RollupOperator, Workload,
};
use primitives::LedgerGateway;

#[derive(Parser)]
#[command(name = "rollup-operator")]
#[command(about = "Rollup operator running against an in-process devnet and anchor")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds (0 = until ctrl-c)
    #[arg(short, long, default_value = "0")]
    duration: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => OperatorConfig::load(path)?,
        None => OperatorConfig::default(),
    };
    let duration = (cli.duration > 0).then(|| Duration::from_secs(cli.duration));

    match config.devnet.prover {
        ProverKind::Mock => {
            let prover = MockBackend::<TREE_DEPTH, BATCH_SIZE>::new();
            run_devnet::<_, MockVerifier>(config, prover, duration).await
        }
        ProverKind::Halo2 => {
            info!(depth = TREE_DEPTH, batch = BATCH_SIZE, "generating proving key");
            let prover = tokio::task::spawn_blocking(Halo2Prover::<TREE_DEPTH, BATCH_SIZE>::setup_minimal)
                .await?
                .context("halo2 setup")?;
            run_devnet::<_, Halo2Verifier<TREE_DEPTH, BATCH_SIZE>>(config, prover, duration).await
        }
    }
}

async fn run_devnet<P, V>(config: OperatorConfig, prover: P, duration: Option<Duration>) -> anyhow::Result<()>
where
    P: BatchProver<TREE_DEPTH, BATCH_SIZE> + 'static,
    V: BatchVerifier + 'static,
{
    let net = Arc::new(DevnetLedger::new(config.channel.clone(), config.devnet.initial_players));
    let anchor = LocalAnchor::new(AnchorContract::<MemoryStore, V>::new(MemoryStore::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut operator = RollupOperator::<TREE_DEPTH, BATCH_SIZE>::new(
        config.clone(),
        net.clone(),
        Arc::new(anchor),
        Arc::new(JsonBlockDecoder),
        Arc::new(prover),
    );
    let traffic = tokio::spawn(drive_devnet(net, config.devnet.clone(), shutdown_rx.clone()));
    let operator_task = tokio::spawn(async move { operator.run(shutdown_rx).await });

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("installing ctrl-c handler")?;
            info!("interrupted");
        }
        _ = deadline => info!("run time elapsed"),
    }

    request_shutdown(&shutdown_tx);
    traffic.await??;
    operator_task.await?.context("operator")?;
    Ok(())
}

/// Seal a block of generated traffic every `block_interval_ms`.
async fn drive_devnet(
    net: Arc<DevnetLedger>,
    config: DevnetConfig,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(Duration::from_millis(config.block_interval_ms));
    let mut workload = Workload::new(config.initial_players);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        for _ in 0..config.txs_per_block {
            let (op, args) = workload.next_tx();
            if let Err(e) = net.submit(op, &args).await {
                debug!(%e, %op, "devnet refused generated tx");
            }
        }
        let block = net.seal_block()?;
        info!(%block, txs = config.txs_per_block, "devnet sealed block");
    }
    Ok(())
}
