//! Node subprocess lifecycle.
//!
//! Each chain runs its own node binary (anvil by default). The process is
//! owned by a supervisor task that forwards output, reports the exit code,
//! and kills the child on request or when the handle is dropped.

use crate::rpc::RpcNode;
use crate::{ChainConfig, LaunchedNode, NodeBackend};
use async_trait::async_trait;
use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::ChainId;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// How much node output is forwarded into the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLogging {
    None,
    /// stderr only.
    #[default]
    Info,
    /// stdout and stderr.
    Debug,
}

/// Program and argument template used to start a node.
///
/// `{port}`, `{chain_id}` and `{evm_chain_id}` are substituted per chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for NodeCommand {
    fn default() -> Self {
        Self {
            program: "anvil".into(),
            args: ["--port", "{port}", "--chain-id", "{evm_chain_id}"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl NodeCommand {
    pub fn render_args(&self, chain: &ChainConfig) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{port}", &chain.port.to_string())
                    .replace("{chain_id}", &chain.chain_id.to_string())
                    .replace("{evm_chain_id}", &chain.evm_chain_id.to_string())
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitState {
    Running,
    /// `None` when terminated by a signal.
    Exited(Option<i32>),
}

/// Handle to a running node process.
///
/// Dropping the handle kills the process.
pub struct NodeProcess {
    chain: ChainId,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<ExitState>,
    supervisor: Option<JoinHandle<()>>,
}

impl NodeProcess {
    /// Spawns the node and returns once the OS confirmed the spawn.
    pub fn spawn(
        command: &NodeCommand,
        chain: &ChainConfig,
        logging: NodeLogging,
    ) -> ChainwebResult<Self> {
        let cid = chain.chain_id;
        let args = command.render_args(chain);

        tracing::info!(chain = %cid, program = %command.program, ?args, "spawning node");

        let mut child = Command::new(&command.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ChainwebError::Lifecycle(format!(
                    "Failed to spawn {} for chain {cid}: {e}",
                    command.program
                ))
            })?;

        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            forward_lines(cid, stdout, logging == NodeLogging::Debug, false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(cid, stderr, logging != NodeLogging::None, true);
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);

        let supervisor = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => match child.kill().await {
                    Ok(()) => child.wait().await,
                    Err(e) => Err(e),
                },
            };

            let state = match status {
                Ok(status) => {
                    match status.code() {
                        None => tracing::info!(chain = %cid, "node terminated by signal"),
                        Some(0) => tracing::info!(chain = %cid, "node exited"),
                        Some(code) => tracing::error!(chain = %cid, code, "node failed"),
                    }
                    ExitState::Exited(status.code())
                }
                Err(e) => {
                    tracing::error!(chain = %cid, error = %e, "failed to reap node");
                    ExitState::Exited(None)
                }
            };
            let _ = exit_tx.send(state);
        });

        Ok(Self {
            chain: cid,
            pid,
            kill_tx: Some(kill_tx),
            exit_rx,
            supervisor: Some(supervisor),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Fails if the node already exited with a nonzero code.
    ///
    /// A zero or signal exit is not treated as a failure here; it is the
    /// normal result of a shutdown.
    pub fn check_alive(&self) -> ChainwebResult<()> {
        match *self.exit_rx.borrow() {
            ExitState::Exited(Some(code)) if code != 0 => Err(ChainwebError::Lifecycle(format!(
                "Node for chain {} failed with code {code}",
                self.chain
            ))),
            _ => Ok(()),
        }
    }

    pub fn has_exited(&self) -> bool {
        matches!(*self.exit_rx.borrow(), ExitState::Exited(_))
    }

    /// Kills the node and waits until it is reaped.
    pub async fn kill(mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                tracing::warn!(chain = %self.chain, error = %e, "node supervisor panicked");
            }
        }
    }
}

fn forward_lines<R>(chain: ChainId, reader: R, enabled: bool, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        // Always drain so the child never blocks on a full pipe.
        while let Ok(Some(line)) = lines.next_line().await {
            if !enabled || line.is_empty() {
                continue;
            }
            if is_stderr {
                tracing::warn!(chain = %chain, "{line}");
            } else {
                tracing::info!(chain = %chain, "{line}");
            }
        }
    });
}

/// Launches real node processes and connects to them over JSON-RPC.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    pub command: NodeCommand,
    /// Fixed wait between spawn and first connection.
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub logging: NodeLogging,
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self {
            command: NodeCommand::default(),
            settle_delay: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(100),
            logging: NodeLogging::default(),
        }
    }
}

#[async_trait]
impl NodeBackend for ProcessBackend {
    async fn launch(&self, chain: &ChainConfig) -> ChainwebResult<LaunchedNode> {
        let process = NodeProcess::spawn(&self.command, chain, self.logging)?;

        tracing::info!(
            chain = %chain.chain_id,
            settle_ms = self.settle_delay.as_millis() as u64,
            "waiting for node to start"
        );
        tokio::time::sleep(self.settle_delay).await;
        process.check_alive()?;

        let rpc = RpcNode::connect(chain.rpc_url()?, self.poll_interval)?;

        Ok(LaunchedNode {
            rpc: Arc::new(rpc),
            process: Some(process),
        })
    }
}
