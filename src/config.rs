//! Configuration (spec §6; SPEC_FULL §10.3). Mirrors every enumerated knob
//! as a `serde`+`toml`-deserializable struct, the same shape as the
//! lineage's own hand-written `Config`/`validate()` split.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// CoAP block size exponent; the transport caps this at 6 (1024 bytes).
    #[serde(default = "default_block_size_exp")]
    pub block_size_exp: u8,
    /// Advisory-only scheduling hints (§5) — not enforced by this crate,
    /// just carried through to logs and, if a caller builds a custom Tokio
    /// runtime, usable to steer task placement.
    #[serde(default = "default_queue_priority")]
    pub ltb_queue_priority: i32,
    #[serde(default = "default_queue_priority")]
    pub publisher_queue_priority: i32,

    pub logger: LoggerConfig,
    pub ltb: LtbConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggerConfig {
    /// Must be a positive power of two.
    pub record_queue_size: usize,
    /// Must be at least `ARRAY_MAX_BYTES` (4).
    pub encoding_buf_size: usize,
    #[serde(default)]
    pub base_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LtbConfig {
    pub pool_path: PathBuf,
    #[serde(default)]
    pub name: Option<String>,
    /// File-count threshold that triggers a publish pass.
    #[serde(default = "default_nb_files_lim")]
    pub nb_files_lim: u64,
    /// Bounded capacity of the dispatch queue.
    #[serde(default = "default_dispatch_queue_bound")]
    pub dispatch_queue_bound: usize,
    /// Absent means the instance never publishes — it only accumulates.
    #[serde(default)]
    pub sender: Option<PublisherConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublisherConfig {
    pub host: String,
    #[serde(default = "default_coap_port")]
    pub port: u16,
    #[serde(default = "default_coap_path")]
    pub path: String,
    #[serde(default = "default_retry_cnt")]
    pub retry_cnt: u32,
    #[serde(default = "default_publisher_queue_bound")]
    pub queue_bound: usize,
}

fn default_block_size_exp() -> u8 {
    6
}
fn default_queue_priority() -> i32 {
    0
}
fn default_nb_files_lim() -> u64 {
    16
}
fn default_dispatch_queue_bound() -> usize {
    64
}
fn default_coap_port() -> u16 {
    5683
}
fn default_coap_path() -> String {
    "senml".into()
}
fn default_retry_cnt() -> u32 {
    3
}
fn default_publisher_queue_bound() -> usize {
    64
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| PipelineError::InvalidArgument(format!("invalid config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.block_size_exp > 6 {
            return Err(PipelineError::InvalidArgument(
                "block_size_exp exceeds the transport's 1024-byte maximum".into(),
            ));
        }
        if self.logger.record_queue_size == 0 || !self.logger.record_queue_size.is_power_of_two() {
            return Err(PipelineError::InvalidArgument(
                "logger.record_queue_size must be a positive power of two".into(),
            ));
        }
        if self.logger.encoding_buf_size < crate::encoder::ARRAY_MAX_BYTES {
            return Err(PipelineError::InvalidArgument(format!(
                "logger.encoding_buf_size must be at least {}",
                crate::encoder::ARRAY_MAX_BYTES
            )));
        }
        if self.ltb.nb_files_lim == 0 {
            return Err(PipelineError::InvalidArgument("ltb.nb_files_lim must be > 0".into()));
        }
        Ok(())
    }
}

/// `name` fields are truncated to 8 characters, matching the source's
/// fixed-size name buffer (spec §6).
pub fn truncate_name(name: &str) -> String {
    name.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_queue_size() {
        let cfg = Config {
            block_size_exp: 6,
            ltb_queue_priority: 0,
            publisher_queue_priority: 0,
            logger: LoggerConfig {
                record_queue_size: 3,
                encoding_buf_size: 256,
                base_name: None,
                name: None,
            },
            ltb: LtbConfig {
                pool_path: "/tmp/does-not-matter".into(),
                name: None,
                nb_files_lim: 16,
                dispatch_queue_bound: 64,
                sender: None,
            },
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn truncate_name_caps_at_eight_chars() {
        assert_eq!(truncate_name("a-very-long-instance-name"), "a-very-l");
        assert_eq!(truncate_name("short"), "short");
    }
}
