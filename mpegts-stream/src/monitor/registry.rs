//! Registry of configured stream monitors, keyed by title.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::RwLock;

use super::{MonitorError, MonitorStatus, UdpStreamMonitor};
use crate::catalog::CatalogHandle;
use crate::config::{property, PropertyMap, PropertyValue, StreamMonitorConfig};

pub struct MonitorRegistry {
    monitors: RwLock<HashMap<String, Arc<UdpStreamMonitor>>>,
    catalog: CatalogHandle,
    chunk_dir: PathBuf,
}

impl MonitorRegistry {
    pub fn new(catalog: CatalogHandle, chunk_dir: PathBuf) -> Self {
        Self {
            monitors: RwLock::new(HashMap::new()),
            catalog,
            chunk_dir,
        }
    }

    /// Register a monitor. It is not started.
    pub async fn add(
        &self,
        config: StreamMonitorConfig,
    ) -> Result<Arc<UdpStreamMonitor>, MonitorError> {
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(&config.title) {
            return Err(MonitorError::AlreadyExists(config.title));
        }

        let title = config.title.clone();
        let monitor = Arc::new(UdpStreamMonitor::new(
            config,
            Arc::clone(&self.catalog),
            self.chunk_dir.clone(),
        ));
        monitors.insert(title, Arc::clone(&monitor));
        Ok(monitor)
    }

    pub async fn get(&self, title: &str) -> Option<Arc<UdpStreamMonitor>> {
        self.monitors.read().await.get(title).cloned()
    }

    fn not_found(title: &str) -> MonitorError {
        MonitorError::NotFound(title.to_string())
    }

    pub async fn statuses(&self) -> Vec<MonitorStatus> {
        let mut statuses: Vec<_> = self
            .monitors
            .read()
            .await
            .values()
            .map(|m| m.status())
            .collect();
        statuses.sort_by(|a, b| a.title.cmp(&b.title));
        statuses
    }

    pub async fn start(&self, title: &str) -> Result<MonitorStatus, MonitorError> {
        let monitor = self.get(title).await.ok_or_else(|| Self::not_found(title))?;
        monitor.start().await?;
        Ok(monitor.status())
    }

    pub async fn stop(&self, title: &str) -> Result<MonitorStatus, MonitorError> {
        let monitor = self.get(title).await.ok_or_else(|| Self::not_found(title))?;
        monitor.stop().await?;
        Ok(monitor.status())
    }

    /// Apply changed properties, re-keying the monitor if its title changed.
    pub async fn update_config(
        &self,
        title: &str,
        changes: &PropertyMap,
    ) -> Result<MonitorStatus, MonitorError> {
        let monitor = self.get(title).await.ok_or_else(|| Self::not_found(title))?;

        if let Some(PropertyValue::Text(new_title)) = changes.get(property::TITLE) {
            if new_title != title && self.get(new_title).await.is_some() {
                return Err(MonitorError::AlreadyExists(new_title.clone()));
            }
        }

        let updated = monitor.update_config(changes).await?;
        if updated.title != title {
            let mut monitors = self.monitors.write().await;
            if let Some(monitor) = monitors.remove(title) {
                monitors.insert(updated.title.clone(), monitor);
            }
        }
        Ok(monitor.status())
    }

    /// Stop (if running) and forget a monitor.
    pub async fn remove(&self, title: &str) -> Result<(), MonitorError> {
        let monitor = self
            .monitors
            .write()
            .await
            .remove(title)
            .ok_or_else(|| Self::not_found(title))?;
        if monitor.local_addr().is_some() {
            monitor.stop().await?;
        }
        Ok(())
    }

    /// Start every monitor configured to start immediately. Failures are
    /// logged and do not prevent the others from starting.
    pub async fn start_configured(&self) -> usize {
        let monitors: Vec<_> = self.monitors.read().await.values().cloned().collect();
        let mut started = 0;
        for monitor in monitors {
            if !monitor.config().start_immediately {
                continue;
            }
            match monitor.start().await {
                Ok(_) => started += 1,
                Err(e) => error!("[Stream {}] Not started: {}", monitor.title(), e),
            }
        }
        started
    }

    pub async fn stop_all(&self) {
        let monitors: Vec<_> = self.monitors.read().await.values().cloned().collect();
        for monitor in monitors {
            if monitor.local_addr().is_none() {
                continue;
            }
            if let Err(e) = monitor.stop().await {
                error!("[Stream {}] Failed to stop: {}", monitor.title(), e);
            }
        }
        info!("All streams stopped");
    }
}
