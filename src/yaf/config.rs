//! Tuning knobs for the flow meter core, collected into one struct so
//! an embedder can load them from a file (via `toml`) or build them
//! programmatically. The core never reads a path itself — that belongs
//! to the excluded CLI layer — it only validates the values it is
//! handed.

use crate::yaf::error::ConfigError;

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct YafConfig {
    /// Threshold for Idle expiry, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Threshold for Active expiry, in milliseconds.
    pub active_timeout_ms: u64,
    /// Open-flow cap; triggers Resource evictions once exceeded.
    pub max_flows: usize,
    /// Fragment-in-flight cap; 0 disables the limit.
    pub max_frags: usize,
    /// Per-direction captured-payload cap in bytes; 0 disables capture.
    pub max_payload: usize,
    /// Idle timeout for an in-flight fragmented datagram, in milliseconds.
    pub frag_idle_ms: u64,
    /// PBufRing slot count. Must be a power of two.
    pub ring_capacity: usize,
    /// Enables UdpForce closures (single-packet UDP "flows" close
    /// immediately rather than waiting for idle expiry).
    pub udp_uniflow_mode: bool,
    /// Whether to track MPLS label stacks during decode.
    pub mpls_enabled: bool,
    /// Whether to recurse one level into GRE-encapsulated IP.
    pub gre_enabled: bool,
    /// Number of packets with payload to observe before invoking the
    /// label plugin for a flow (0 invokes it on the first payload
    /// packet).
    pub applabel_packet_count: u32,
}

impl Default for YafConfig {
    /// Matches the reference implementation's defaults: 30s idle,
    /// 30 minute active timeout, 1500 bytes of payload capture.
    fn default() -> Self {
        YafConfig {
            idle_timeout_ms: 30_000,
            active_timeout_ms: 1_800_000,
            max_flows: 1_000_000,
            max_frags: 16_384,
            max_payload: 1500,
            frag_idle_ms: 30_000,
            ring_capacity: 1024,
            udp_uniflow_mode: false,
            mpls_enabled: true,
            gre_enabled: false,
            applabel_packet_count: 1,
        }
    }
}

impl YafConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_capacity == 0 || (self.ring_capacity & (self.ring_capacity - 1)) != 0 {
            return Err(ConfigError::RingCapacityNotPowerOfTwo(self.ring_capacity));
        }
        if self.max_flows == 0 {
            return Err(ConfigError::MaxFlowsZero);
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::IdleTimeoutZero);
        }
        Ok(())
    }

    /// Parses a config from TOML text, then validates it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigLoadError> {
        let cfg: YafConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(YafConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_ring() {
        let mut cfg = YafConfig::default();
        cfg.ring_capacity = 1000;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::RingCapacityNotPowerOfTwo(1000))
        );
    }

    #[test]
    fn rejects_zero_max_flows() {
        let mut cfg = YafConfig::default();
        cfg.max_flows = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::MaxFlowsZero));
    }

    #[test]
    fn loads_from_toml() {
        let text = r#"
            idle_timeout_ms = 5000
            active_timeout_ms = 60000
            max_flows = 10
            max_frags = 4
            max_payload = 256
            frag_idle_ms = 1000
            ring_capacity = 16
            udp_uniflow_mode = true
            mpls_enabled = false
            gre_enabled = false
            applabel_packet_count = 1
        "#;
        let cfg = YafConfig::from_toml_str(text).unwrap();
        assert_eq!(cfg.idle_timeout_ms, 5000);
        assert!(cfg.udp_uniflow_mode);
    }
}
