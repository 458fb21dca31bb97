//! UDP listener and lifecycle of one monitored stream.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{
    MonitorError, MonitorState, MonitorStats, MonitorStatsSnapshot, StateCell, StreamProcessor,
};
use crate::catalog::CatalogHandle;
use crate::config::{PropertyMap, StreamMonitorConfig};
use crate::rollover::{CatalogRolloverAction, ParentState};

/// Largest UDP payload.
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// How often time-based rollover conditions are checked.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Default wait for in-flight commits on stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

enum Command {
    Reconfigure {
        config: StreamMonitorConfig,
        action: Arc<CatalogRolloverAction>,
        done: oneshot::Sender<()>,
    },
    Stop,
}

struct Running {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Status of a monitor as reported by the web API.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub title: String,
    pub monitored_address: String,
    pub local_address: Option<SocketAddr>,
    pub state: MonitorState,
    pub rollover: String,
    pub parent_id: Option<String>,
    pub stats: MonitorStatsSnapshot,
    pub last_error: Option<String>,
    pub config: PropertyMap,
}

/// One monitored stream session.
///
/// The parent record state lives as long as the monitor, so a stop/start
/// cycle keeps adding chunks to the same parent.
pub struct UdpStreamMonitor {
    config: RwLock<StreamMonitorConfig>,
    catalog: CatalogHandle,
    parent: Arc<ParentState>,
    chunk_dir: PathBuf,
    state: Arc<StateCell>,
    stats: Arc<MonitorStats>,
    local_addr: RwLock<Option<SocketAddr>>,
    running: Mutex<Option<Running>>,
    stop_timeout: Duration,
}

impl UdpStreamMonitor {
    pub fn new(config: StreamMonitorConfig, catalog: CatalogHandle, chunk_dir: PathBuf) -> Self {
        Self {
            config: RwLock::new(config),
            catalog,
            parent: Arc::new(ParentState::new()),
            chunk_dir,
            state: Arc::new(StateCell::new(MonitorState::Stopped)),
            stats: Arc::new(MonitorStats::new()),
            local_addr: RwLock::new(None),
            running: Mutex::new(None),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn title(&self) -> String {
        self.config.read().title.clone()
    }

    pub fn config(&self) -> StreamMonitorConfig {
        self.config.read().clone()
    }

    pub fn state(&self) -> MonitorState {
        self.state.get()
    }

    /// Address the socket is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    pub fn stats(&self) -> &Arc<MonitorStats> {
        &self.stats
    }

    pub fn status(&self) -> MonitorStatus {
        let config = self.config.read();
        MonitorStatus {
            title: config.title.clone(),
            monitored_address: config.monitored_address.clone(),
            local_address: self.local_addr(),
            state: self.state.get(),
            rollover: config.rollover_condition().describe(),
            parent_id: self.parent.id(),
            stats: self.stats.snapshot(),
            last_error: self.stats.last_error(),
            config: config.to_properties(),
        }
    }

    fn action(&self, config: &StreamMonitorConfig) -> Arc<CatalogRolloverAction> {
        Arc::new(CatalogRolloverAction::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.parent),
            config.rollover_settings(),
        ))
    }

    /// Bind the socket and start receiving.
    pub async fn start(&self) -> Result<SocketAddr, MonitorError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(MonitorError::InvalidState {
                operation: "start",
                state: self.state.get(),
            });
        }

        self.state.set(MonitorState::Starting);
        let config = self.config();
        let (socket, local_addr) = match self.bind(&config).await {
            Ok(bound) => bound,
            Err(e) => {
                error!("[Stream {}] Failed to start: {}", config.title, e);
                self.stats.record_error(e.to_string());
                self.state.set(MonitorState::Stopped);
                return Err(e);
            }
        };

        let action = self.action(&config);
        debug!(
            "[Stream {}] Parent updaters: {}",
            config.title,
            action.updaters().names().join(", ")
        );
        let processor = StreamProcessor::new(
            &config,
            action,
            self.chunk_dir.clone(),
            Arc::clone(&self.stats),
            Arc::clone(&self.state),
        );
        let (commands, receiver) = mpsc::channel(8);
        let title = config.title.clone();
        let stop_timeout = self.stop_timeout;

        // Monitoring must be visible before the first rollover can happen.
        self.state.set(MonitorState::Monitoring);
        let task = tokio::spawn(async move {
            receive_loop(title, socket, processor, receiver, stop_timeout).await;
        });

        *self.local_addr.write() = Some(local_addr);
        *running = Some(Running { commands, task });
        info!(
            "[Stream {}] Monitoring {} (bound to {}), rollover on {}",
            config.title,
            config.monitored_address,
            local_addr,
            config.rollover_condition().describe()
        );
        Ok(local_addr)
    }

    async fn bind(
        &self,
        config: &StreamMonitorConfig,
    ) -> Result<(UdpSocket, SocketAddr), MonitorError> {
        tokio::fs::create_dir_all(&self.chunk_dir).await?;
        let socket = UdpSocket::bind(config.socket_addr)
            .await
            .map_err(|source| MonitorError::Bind {
                addr: config.socket_addr,
                source,
            })?;
        let local_addr = socket.local_addr()?;
        Ok((socket, local_addr))
    }

    /// Stop receiving, complete the last chunk and wait for its commit.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let mut running = self.running.lock().await;
        let Some(run) = running.take() else {
            return Err(MonitorError::InvalidState {
                operation: "stop",
                state: self.state.get(),
            });
        };

        self.state.set(MonitorState::Stopping);
        let title = self.title();
        info!("[Stream {}] Stopping", title);

        if run.commands.send(Command::Stop).await.is_err() {
            debug!("[Stream {}] Receive task already finished", title);
        }
        if let Err(e) = run.task.await {
            error!("[Stream {}] Receive task failed: {}", title, e);
        }

        *self.local_addr.write() = None;
        self.state.set(MonitorState::Stopped);
        info!("[Stream {}] Stopped", title);
        Ok(())
    }

    /// Apply changed properties.
    ///
    /// A running monitor keeps its socket unless the address changed, in
    /// which case it is restarted on the new one. The current chunk is
    /// completed either way.
    pub async fn update_config(
        &self,
        changes: &PropertyMap,
    ) -> Result<StreamMonitorConfig, MonitorError> {
        let running = self.running.lock().await;
        let current = self.config();
        let updated = current.merged(changes)?;

        let Some(run) = running.as_ref() else {
            *self.config.write() = updated.clone();
            info!("[Stream {}] Configuration updated", updated.title);
            return Ok(updated);
        };

        if current.address_changed(&updated) {
            info!(
                "[Stream {}] Address changed from {} to {}, restarting",
                current.title, current.monitored_address, updated.monitored_address
            );
            drop(running);
            self.stop().await?;
            *self.config.write() = updated.clone();
            self.start().await?;
            return Ok(updated);
        }

        let (done, applied) = oneshot::channel();
        let command = Command::Reconfigure {
            config: updated.clone(),
            action: self.action(&updated),
            done,
        };
        *self.config.write() = updated.clone();
        if run.commands.send(command).await.is_ok() && applied.await.is_err() {
            warn!(
                "[Stream {}] Receive task exited before applying configuration",
                updated.title
            );
        }
        Ok(updated)
    }
}

async fn receive_loop(
    title: String,
    socket: UdpSocket,
    mut processor: StreamProcessor,
    mut commands: mpsc::Receiver<Command>,
    stop_timeout: Duration,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Reconfigure { config, action, done }) => {
                    processor.apply_config(&config, action).await;
                    let _ = done.send(());
                }
                Some(Command::Stop) | None => break,
            },

            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    log::trace!("[Stream {}] {} bytes from {}", title, len, from);
                    processor.handle_datagram(&buf[..len], Instant::now()).await;
                }
                Err(e) => warn!("[Stream {}] Receive error: {}", title, e),
            },

            Some(joined) = processor.commits.join_next(), if !processor.commits.is_empty() => {
                processor.reap(joined);
            }

            _ = ticker.tick() => {
                processor.on_tick(Instant::now()).await;
            }
        }
    }

    processor.shutdown(stop_timeout).await;
}
