use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_mask_protocol() -> String {
    "tls".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pre-scan every address in a file before rewriting it, so the mapping
    /// is complete before the rewrite pass begins. Off by default: the
    /// mapping is populated lazily as addresses are encountered either way.
    #[serde(default)]
    pub pre_scan: bool,
}

impl Default for AnonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pre_scan: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationDataPreserve {
    Full,
    HeaderOnly,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreserveConfig {
    #[serde(default = "default_true")]
    pub handshake: bool,
    #[serde(default = "default_true")]
    pub alert: bool,
    #[serde(default = "default_true")]
    pub change_cipher_spec: bool,
    #[serde(default = "default_true")]
    pub heartbeat: bool,
    #[serde(default = "default_application_data")]
    pub application_data: ApplicationDataPreserve,
}

fn default_application_data() -> ApplicationDataPreserve {
    ApplicationDataPreserve::HeaderOnly
}

impl Default for PreserveConfig {
    fn default() -> Self {
        Self {
            handshake: true,
            alert: true,
            change_cipher_spec: true,
            heartbeat: true,
            application_data: ApplicationDataPreserve::HeaderOnly,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mask_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub preserve: PreserveConfig,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocol: default_mask_protocol(),
            preserve: PreserveConfig::default(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl MaskConfig {
    /// Any protocol other than `"tls"` falls back to default-deny mask-all
    /// for the file's TCP traffic - there is deliberately no config knob to
    /// relax that, see the design notes on `mask.unknown_protocol`.
    pub fn is_tls(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("tls")
    }
}

/// Top-level configuration accepted by `PipelineExecutor::new`. The core
/// never reads this from disk; a host binary owns that concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub anon: AnonConfig,
    #[serde(default)]
    pub mask: MaskConfig,
}
