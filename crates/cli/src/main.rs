//! CLI for the chainweb simulator.
//!
//! `run` starts a local network, `trigger` and `continuous` drive an
//! external miner, `distance` and `verify` inspect graphs and proofs.

use chainweb_core::{spv, ChainId, ChainwebError, ChainwebResult, Graph};
use chainweb_miner::trigger::{self, TriggerState};
use chainweb_miner::{
    continuous, ContinuousConfig, MinerClient, MinerConfig, MiningBackend, TriggerConfig,
};
use chainweb_network::{ChainwebNetwork, NetworkConfig, SharedNetwork, DEFAULT_BASE_PORT};
use chainweb_provider::{MemoryBackend, NodeBackend, NodeLogging};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "chainweb-sim", version, about = "Simulated chainweb network and miner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a local network and keep it running until interrupted.
    Run {
        /// Number of chains; must have a built-in graph (2, 3, 10 or 20).
        #[arg(short, long, env = "CHAINWEB_CHAINS", default_value_t = 2)]
        chains: usize,

        /// JSON network config; overrides `--chains`.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_BASE_PORT)]
        base_port: u16,

        #[arg(long, default_value_t = 0)]
        chain_id_offset: u32,

        /// Node binary used instead of the configured one.
        #[arg(long, env = "CHAINWEB_NODE")]
        node_program: Option<String>,

        /// Node output forwarded into the log.
        #[arg(long, value_enum, default_value_t = NodeOutput::Info)]
        node_output: NodeOutput,

        /// Use in-process nodes instead of spawning node binaries.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Also serve the mining trigger against this network.
        #[arg(long, default_value_t = false)]
        trigger: bool,

        #[command(flatten)]
        trigger_config: TriggerConfig,

        /// Seconds between fallback mining rounds.
        #[arg(long, default_value_t = 12)]
        fallback_secs: u64,
    },

    /// Mine through an external miner whenever a transaction is sent.
    Trigger {
        #[command(flatten)]
        miner: MinerConfig,

        #[command(flatten)]
        trigger: TriggerConfig,
    },

    /// Mine through an external miner with an adaptive retry budget.
    Continuous {
        #[command(flatten)]
        miner: MinerConfig,

        #[command(flatten)]
        continuous: ContinuousConfig,
    },

    /// Print hop distances of a built-in graph.
    Distance {
        #[arg(short, long, default_value_t = 10)]
        chains: usize,

        /// Print the adjacency map as JSON instead.
        #[arg(long, default_value_t = false)]
        json: bool,

        src: Option<ChainId>,

        trg: Option<ChainId>,
    },

    /// Verify a hex-encoded SPV proof and print its message.
    Verify { proof: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum NodeOutput {
    None,
    Info,
    Debug,
}

impl From<NodeOutput> for NodeLogging {
    fn from(output: NodeOutput) -> Self {
        match output {
            NodeOutput::None => NodeLogging::None,
            NodeOutput::Info => NodeLogging::Info,
            NodeOutput::Debug => NodeLogging::Debug,
        }
    }
}

/// Resolves on interrupt or terminate.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for terminate");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("interrupt received"),
        _ = terminate => tracing::info!("terminate received"),
    }
}

fn stopped(mut rx: watch::Receiver<bool>) -> impl std::future::Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Serves the trigger endpoint and the fallback timer until `rx` flips.
async fn serve_trigger(
    backend: Arc<dyn MiningBackend>,
    chains: Vec<ChainId>,
    config: &TriggerConfig,
    fallback: Duration,
    rx: watch::Receiver<bool>,
) -> ChainwebResult<()> {
    let state = Arc::new(TriggerState::new(
        backend,
        chains,
        config.trigger_delay(),
        config.cooldown(),
    ));
    let listener = TcpListener::bind(config.listen).await.map_err(|e| {
        ChainwebError::Config(format!("Cannot bind trigger listener on {}: {e}", config.listen))
    })?;

    let server = trigger::serve(listener, state.clone(), stopped(rx.clone()));
    if config.no_fallback {
        server.await?;
    } else {
        let fallback = trigger::run_fallback(state, fallback, stopped(rx));
        let (served, ()) = tokio::join!(server, fallback);
        served?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            chains,
            config,
            base_port,
            chain_id_offset,
            node_program,
            node_output,
            dry_run,
            trigger,
            trigger_config,
            fallback_secs,
        } => {
            let mut network_config = match config {
                Some(path) => NetworkConfig::from_json_file(path)?,
                None => NetworkConfig::for_chains(chains)?
                    .with_chain_id_offset(chain_id_offset)
                    .with_base_port(base_port)?,
            };
            if let Some(program) = node_program {
                network_config.node.program = program;
            }
            network_config.logging = node_output.into();

            let backend: Arc<dyn NodeBackend> = if dry_run {
                tracing::info!("dry_run mode: using in-process nodes");
                Arc::new(MemoryBackend::new())
            } else {
                Arc::new(network_config.process_backend())
            };

            let shared = SharedNetwork::new(Arc::new(ChainwebNetwork::new(network_config, backend)?))?;
            shared.acquire().await?;
            let network = shared.network().clone();

            for chain in network.chains() {
                tracing::info!(
                    chain = %chain.chain_id(),
                    adjacents = ?chain.adjacent_ids(),
                    rpc_url = %chain.config().rpc_url()?,
                    "chain ready"
                );
            }

            let (stop_tx, stop_rx) = watch::channel(false);
            let trigger_task = trigger.then(|| {
                let backend: Arc<dyn MiningBackend> = network.clone();
                let chains = network.chain_ids();
                let config = trigger_config.clone();
                let rx = stop_rx.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        serve_trigger(backend, chains, &config, Duration::from_secs(fallback_secs), rx)
                            .await
                    {
                        tracing::error!(error = %e, "mining trigger failed");
                    }
                })
            });

            shutdown_signal().await;
            let _ = stop_tx.send(true);
            if let Some(task) = trigger_task {
                let _ = task.await;
            }
            shared.force_stop().await;
        }

        Commands::Trigger { miner, trigger } => {
            tracing::info!(?miner, ?trigger, "starting mining trigger");
            let backend: Arc<dyn MiningBackend> = Arc::new(MinerClient::new(&miner));

            let (stop_tx, stop_rx) = watch::channel(false);
            let server = serve_trigger(
                backend,
                miner.chains.clone(),
                &trigger,
                miner.confirmation_period(),
                stop_rx,
            );
            let signal = async {
                shutdown_signal().await;
                let _ = stop_tx.send(true);
            };
            let (served, ()) = tokio::join!(server, signal);
            served?;
        }

        Commands::Continuous { miner, continuous } => {
            tracing::info!(?miner, ?continuous, "starting continuous mining");
            let backend: Arc<dyn MiningBackend> = Arc::new(MinerClient::new(&miner));
            continuous::run(backend, miner.chains, continuous, shutdown_signal()).await?;
        }

        Commands::Distance {
            chains,
            json,
            src,
            trg,
        } => {
            let graph = Graph::canonical(chains)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&graph)?);
                return Ok(());
            }

            match (src, trg) {
                (Some(src), Some(trg)) => println!("{}", graph.distance(src, trg)?),
                _ => {
                    let ids: Vec<ChainId> = graph.chain_ids().collect();
                    let mut diameter = 0;
                    for src in &ids {
                        let row = ids
                            .iter()
                            .map(|trg| graph.distance(*src, *trg))
                            .collect::<Result<Vec<_>, _>>()?;
                        diameter = row.iter().copied().fold(diameter, u32::max);
                        let cells: Vec<String> = row.iter().map(u32::to_string).collect();
                        println!("{:>3}: {}", src.as_u32(), cells.join(" "));
                    }
                    println!("diameter: {diameter}");
                }
            }
        }

        Commands::Verify { proof } => {
            let bytes = spv::proof_from_hex(&proof)?;
            let msg = spv::verify_proof(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&msg)?);
            println!("origin hash: {}", spv::compute_origin_hash(&msg.origin));
        }
    }

    Ok(())
}
