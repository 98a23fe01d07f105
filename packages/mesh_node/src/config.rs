use anyhow::{Context, Result};
use mesh_core::transport::descriptor::Credentials;
use mesh_core::transport::relay::RelayConfig;
use mesh_core::transport::rtc::{DEFAULT_STUN_URL, RtcConfig};
use serde::{Deserialize, Serialize};
use side_channel::acoustic::ListenOptions;
use side_channel::qr::ScanOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::session::SessionConfig;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [relay]
//                    url = "wss://relay.example/ws"
//
//   env var:         MESH_RELAY__URL=wss://relay.example/ws   (double underscore = nesting)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub node: NodeFileConfig,
    #[serde(default)]
    pub mesh: MeshFileConfig,
    #[serde(default)]
    pub rtc: RtcFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub acoustic: AcousticFileConfig,
    #[serde(default)]
    pub qr: QrFileConfig,
}

/// `[node]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeFileConfig {
    /// Router id. A random UUID per run when unset.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name sent in announcements.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_ttl")]
    pub default_ttl: i64,
}

impl Default for NodeFileConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: default_name(),
            default_ttl: default_ttl(),
        }
    }
}

/// `[mesh]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshFileConfig {
    #[serde(default = "default_recency_window_secs")]
    pub recency_window_secs: u64,
}

impl Default for MeshFileConfig {
    fn default() -> Self {
        Self {
            recency_window_secs: default_recency_window_secs(),
        }
    }
}

/// `[rtc]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RtcFileConfig {
    #[serde(default)]
    pub use_stun: bool,
    #[serde(default = "default_stun_url")]
    pub stun_url: String,
    /// Pre-shared key bound into every descriptor.
    #[serde(default)]
    pub psk: Option<String>,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_ice_timeout_ms")]
    pub ice_timeout_ms: u64,
}

impl Default for RtcFileConfig {
    fn default() -> Self {
        Self {
            use_stun: false,
            stun_url: default_stun_url(),
            psk: None,
            heartbeat_ms: default_heartbeat_ms(),
            ice_timeout_ms: default_ice_timeout_ms(),
        }
    }
}

/// `[relay]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    /// Relay fallback is disabled without a URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            url: None,
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_buffered_bytes: default_max_buffered_bytes(),
            outbox_capacity: default_outbox_capacity(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

/// `[acoustic]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcousticFileConfig {
    #[serde(default = "default_bit_duration_ms")]
    pub bit_duration_ms: u64,
    #[serde(default = "default_listen_timeout_ms")]
    pub listen_timeout_ms: u64,
    #[serde(default = "default_calibration_step_timeout_ms")]
    pub calibration_step_timeout_ms: u64,
}

impl Default for AcousticFileConfig {
    fn default() -> Self {
        Self {
            bit_duration_ms: default_bit_duration_ms(),
            listen_timeout_ms: default_listen_timeout_ms(),
            calibration_step_timeout_ms: default_calibration_step_timeout_ms(),
        }
    }
}

/// `[qr]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QrFileConfig {
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

impl Default for QrFileConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: default_scan_timeout_ms(),
            max_dimension: default_max_dimension(),
            max_payload: default_max_payload(),
        }
    }
}

fn default_name() -> String {
    "meshnode".to_string()
}
fn default_ttl() -> i64 {
    8
}
fn default_recency_window_secs() -> u64 {
    300
}
fn default_stun_url() -> String {
    DEFAULT_STUN_URL.to_string()
}
fn default_heartbeat_ms() -> u64 {
    5000
}
fn default_ice_timeout_ms() -> u64 {
    5000
}
fn default_min_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    16000
}
fn default_max_buffered_bytes() -> usize {
    1024 * 1024
}
fn default_outbox_capacity() -> usize {
    256
}
fn default_flush_interval_ms() -> u64 {
    50
}
fn default_bit_duration_ms() -> u64 {
    50
}
fn default_listen_timeout_ms() -> u64 {
    15000
}
fn default_calibration_step_timeout_ms() -> u64 {
    3000
}
fn default_scan_timeout_ms() -> u64 {
    15000
}
fn default_max_dimension() -> u32 {
    1024
}
fn default_max_payload() -> usize {
    2048
}

/// Layers: defaults → `<data_dir>/config.toml` → `MESH_*` env vars.
///
///   `MESH_NODE__NAME=kitchen`  →  `node.name = "kitchen"`
///   `MESH_RELAY__MAX_BACKOFF_MS=8000`  →  `relay.max_backoff_ms = 8000`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("MESH_").split("__"))
}

// =============================================================================
// Runtime views
// =============================================================================

impl FileConfig {
    pub fn rtc_config(&self) -> RtcConfig {
        RtcConfig {
            use_stun: self.rtc.use_stun,
            stun_url: self.rtc.stun_url.clone(),
            heartbeat_interval: Duration::from_millis(self.rtc.heartbeat_ms),
            ice_timeout: Duration::from_millis(self.rtc.ice_timeout_ms),
            credentials: Credentials {
                psk: self.rtc.psk.clone(),
                ..Default::default()
            },
        }
    }

    pub fn relay_config(&self) -> Option<RelayConfig> {
        let url = self.relay.url.as_ref().filter(|u| !u.is_empty())?;
        Some(RelayConfig {
            min_backoff: Duration::from_millis(self.relay.min_backoff_ms),
            max_backoff: Duration::from_millis(self.relay.max_backoff_ms),
            max_buffered_bytes: self.relay.max_buffered_bytes,
            outbox_capacity: self.relay.outbox_capacity,
            flush_interval: Duration::from_millis(self.relay.flush_interval_ms),
            heartbeat_interval: Duration::from_millis(self.rtc.heartbeat_ms),
            ..RelayConfig::new(url.clone())
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            node_id: self.node.id.clone(),
            name: self.node.name.clone(),
            default_ttl: self.node.default_ttl,
            recency_window: Duration::from_secs(self.mesh.recency_window_secs),
            rtc: self.rtc_config(),
            relay: self.relay_config(),
        }
    }

    pub fn listen_options(&self) -> ListenOptions {
        ListenOptions {
            bit_duration: Duration::from_millis(self.acoustic.bit_duration_ms),
            timeout: Duration::from_millis(self.acoustic.listen_timeout_ms),
            ..Default::default()
        }
    }

    pub fn calibration_step_timeout(&self) -> Duration {
        Duration::from_millis(self.acoustic.calibration_step_timeout_ms)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            timeout: Duration::from_millis(self.qr.scan_timeout_ms),
            max_dimension: self.qr.max_dimension,
            max_payload: self.qr.max_payload,
            ..Default::default()
        }
    }
}

// =============================================================================
// Directory layout (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct NodePaths {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl NodePaths {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("could not find home directory")?
                .join(".meshnode"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("seen.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
