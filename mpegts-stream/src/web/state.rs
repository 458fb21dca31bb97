//! Web server shared state.

use std::sync::Arc;

use crate::monitor::MonitorRegistry;
use crate::DatabaseHandle;

pub struct WebState {
    pub database: DatabaseHandle,
    pub registry: Arc<MonitorRegistry>,
}

impl WebState {
    pub fn new(database: DatabaseHandle, registry: Arc<MonitorRegistry>) -> Self {
        Self { database, registry }
    }
}
