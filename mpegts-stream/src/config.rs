//! Stream monitor configuration.
//!
//! Each monitored stream is described by a flat property map, either from a
//! `[[stream]]` table of the configuration file or posted to the web API.

use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stream_klv::Context;
use thiserror::Error;

use crate::rollover::{RolloverCondition, RolloverSettings};

/// Property names.
pub mod property {
    pub const TITLE: &str = "title";
    pub const MONITORED_ADDRESS: &str = "monitoredAddress";
    pub const BYTE_COUNT: &str = "byteCountRolloverCondition";
    pub const ELAPSED_TIME: &str = "elapsedTimeRolloverCondition";
    pub const IDLE_TIMEOUT: &str = "idleTimeoutRolloverCondition";
    pub const INITIAL_DELAY: &str = "metacardUpdateInitialDelay";
    pub const START_IMMEDIATELY: &str = "startImmediately";
    pub const DISTANCE_TOLERANCE: &str = "distanceTolerance";
    pub const PARENT_TITLE: &str = "parentTitle";
}

pub const DEFAULT_BYTE_COUNT: u64 = 5_000_000;
pub const DEFAULT_ELAPSED_TIME_MS: u64 = 15_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_DISTANCE_TOLERANCE: f64 = 0.0001;

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required property: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Unsupported address scheme in {0} (expected udp://host:port)")]
    UnsupportedScheme(String),

    #[error("Cannot resolve {address}: {reason}")]
    Unresolvable { address: String, reason: String },
}

/// Validated configuration of one monitored stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamMonitorConfig {
    pub title: String,
    /// As configured, e.g. `udp://127.0.0.1:50000`.
    pub monitored_address: String,
    pub socket_addr: SocketAddr,
    pub byte_count_threshold: u64,
    pub elapsed_time_threshold: Duration,
    pub idle_timeout: Duration,
    pub metacard_update_initial_delay: Duration,
    pub start_immediately: bool,
    pub distance_tolerance: f64,
    pub parent_title: Option<String>,
}

impl StreamMonitorConfig {
    pub fn from_properties(props: &PropertyMap) -> Result<Self, ConfigError> {
        let title = text(props, property::TITLE)?
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing(property::TITLE))?;
        let monitored_address = text(props, property::MONITORED_ADDRESS)?
            .ok_or(ConfigError::Missing(property::MONITORED_ADDRESS))?;
        let socket_addr = parse_udp_address(&monitored_address)?;

        let byte_count_threshold =
            positive(props, property::BYTE_COUNT)?.unwrap_or(DEFAULT_BYTE_COUNT);
        let elapsed_ms = positive(props, property::ELAPSED_TIME)?.unwrap_or(DEFAULT_ELAPSED_TIME_MS);
        let idle_ms = positive(props, property::IDLE_TIMEOUT)?.unwrap_or(DEFAULT_IDLE_TIMEOUT_MS);
        let initial_delay_secs = non_negative(props, property::INITIAL_DELAY)?.unwrap_or(0);

        let distance_tolerance = match props.get(property::DISTANCE_TOLERANCE) {
            None => DEFAULT_DISTANCE_TOLERANCE,
            Some(PropertyValue::Float(f)) => *f,
            Some(PropertyValue::Integer(i)) => *i as f64,
            Some(PropertyValue::Text(s)) => s.trim().parse().map_err(|_| invalid(property::DISTANCE_TOLERANCE, s))?,
            Some(other) => return Err(invalid(property::DISTANCE_TOLERANCE, other)),
        };
        if !distance_tolerance.is_finite() || distance_tolerance < 0.0 {
            return Err(invalid(property::DISTANCE_TOLERANCE, distance_tolerance));
        }

        let start_immediately = match props.get(property::START_IMMEDIATELY) {
            None => false,
            Some(PropertyValue::Bool(b)) => *b,
            Some(PropertyValue::Text(s)) => s
                .trim()
                .parse()
                .map_err(|_| invalid(property::START_IMMEDIATELY, s))?,
            Some(other) => return Err(invalid(property::START_IMMEDIATELY, other)),
        };

        Ok(Self {
            title,
            monitored_address,
            socket_addr,
            byte_count_threshold,
            elapsed_time_threshold: Duration::from_millis(elapsed_ms),
            idle_timeout: Duration::from_millis(idle_ms),
            metacard_update_initial_delay: Duration::from_secs(initial_delay_secs),
            start_immediately,
            distance_tolerance,
            parent_title: text(props, property::PARENT_TITLE)?,
        })
    }

    pub fn to_properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        let mut put = |name: &str, value: PropertyValue| {
            props.insert(name.to_string(), value);
        };
        put(property::TITLE, PropertyValue::Text(self.title.clone()));
        put(
            property::MONITORED_ADDRESS,
            PropertyValue::Text(self.monitored_address.clone()),
        );
        put(
            property::BYTE_COUNT,
            PropertyValue::Integer(self.byte_count_threshold as i64),
        );
        put(
            property::ELAPSED_TIME,
            PropertyValue::Integer(self.elapsed_time_threshold.as_millis() as i64),
        );
        put(
            property::IDLE_TIMEOUT,
            PropertyValue::Integer(self.idle_timeout.as_millis() as i64),
        );
        put(
            property::INITIAL_DELAY,
            PropertyValue::Integer(self.metacard_update_initial_delay.as_secs() as i64),
        );
        put(
            property::START_IMMEDIATELY,
            PropertyValue::Bool(self.start_immediately),
        );
        put(
            property::DISTANCE_TOLERANCE,
            PropertyValue::Float(self.distance_tolerance),
        );
        if let Some(parent_title) = &self.parent_title {
            put(property::PARENT_TITLE, PropertyValue::Text(parent_title.clone()));
        }
        props
    }

    /// Overlay `changes` on this configuration.
    pub fn merged(&self, changes: &PropertyMap) -> Result<Self, ConfigError> {
        let mut props = self.to_properties();
        props.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self::from_properties(&props)
    }

    /// Whether switching to `other` needs a new socket.
    pub fn address_changed(&self, other: &Self) -> bool {
        self.socket_addr != other.socket_addr
    }

    pub fn rollover_condition(&self) -> RolloverCondition {
        RolloverCondition::Any(vec![
            RolloverCondition::ByteCount {
                bytes: self.byte_count_threshold,
            },
            RolloverCondition::ElapsedTime {
                after: self.elapsed_time_threshold,
            },
            RolloverCondition::Idle {
                after: self.idle_timeout,
            },
        ])
    }

    pub fn rollover_settings(&self) -> RolloverSettings {
        RolloverSettings {
            parent_title: self.parent_title.clone(),
            initial_delay: self.metacard_update_initial_delay,
            geometry: Context::with_tolerance(self.distance_tolerance),
            ..RolloverSettings::new(self.title.clone(), self.monitored_address.clone())
        }
    }
}

/// Parse `udp://host:port` into a socket address.
pub fn parse_udp_address(uri: &str) -> Result<SocketAddr, ConfigError> {
    let rest = uri
        .trim()
        .strip_prefix("udp://")
        .ok_or_else(|| ConfigError::UnsupportedScheme(uri.to_string()))?;
    let rest = rest.trim_end_matches('/');

    rest.to_socket_addrs()
        .map_err(|e| ConfigError::Unresolvable {
            address: uri.to_string(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| ConfigError::Unresolvable {
            address: uri.to_string(),
            reason: "no addresses".to_string(),
        })
}

fn invalid(name: &'static str, value: impl std::fmt::Debug) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: format!("unexpected value {:?}", value),
    }
}

fn text(props: &PropertyMap, name: &'static str) -> Result<Option<String>, ConfigError> {
    match props.get(name) {
        None => Ok(None),
        Some(PropertyValue::Text(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(name, other)),
    }
}

fn non_negative(props: &PropertyMap, name: &'static str) -> Result<Option<u64>, ConfigError> {
    let value = match props.get(name) {
        None => return Ok(None),
        Some(PropertyValue::Integer(i)) => *i,
        Some(PropertyValue::Text(s)) => s.trim().parse().map_err(|_| invalid(name, s))?,
        Some(other) => return Err(invalid(name, other)),
    };
    u64::try_from(value)
        .map(Some)
        .map_err(|_| invalid(name, value))
}

fn positive(props: &PropertyMap, name: &'static str) -> Result<Option<u64>, ConfigError> {
    match non_negative(props, name)? {
        Some(0) => Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}
