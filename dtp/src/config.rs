//! Flow configuration (spec.md §3 "Flow configuration", §4.8).
//!
//! Plain `serde`-derived structs so the (out-of-scope) management plane can
//! populate a flow's configuration from whatever RIB/TOML/JSON encoding it
//! uses without this crate caring which, mirroring how `anirbanbasu-ari`
//! wires `serde` onto its own config surface.
use serde::{Deserialize, Serialize};

/// Value of `max_sdu_gap` marking an unreliable flow (spec.md §3: "all-ones").
pub const MAX_SDU_GAP_UNRELIABLE: u32 = u32::MAX;

/// Default Maximum PDU Lifetime, milliseconds, used when a flow's config
/// leaves `mpl_ms` at zero (spec.md §4.8 "MPL default").
pub const DEFAULT_MPL_MS: u64 = 1000;
/// Default initial retransmission interval, milliseconds.
pub const DEFAULT_INITIAL_TR_MS: u64 = 1000;
/// Default maximum retransmission attempts.
pub const DEFAULT_DATA_RXMS_MAX: u32 = 10;

/// Upper bound on `rtxq` length (spec.md §4.8 "max_rtxq_len = 64").
pub const MAX_RTXQ_LEN: usize = 64;
/// Upper bound on `seqq` length (spec.md §4.6 step 12, §8).
pub const MAX_SEQQ_LEN: usize = 64;

/// Per-flow configuration, populated by the management plane before
/// `flow_init` (spec.md §6.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowConfig {
    pub dtcp_present: bool,
    pub in_order_delivery: bool,
    /// `0` = reliable (no gap tolerated), [`MAX_SDU_GAP_UNRELIABLE`] = fully
    /// unreliable (never drop for a gap reason).
    pub max_sdu_gap: u32,
    pub dtcp: DtcpConfig,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            dtcp_present: false,
            in_order_delivery: true,
            max_sdu_gap: 0,
            dtcp: DtcpConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DtcpConfig {
    pub flow_control: bool,
    pub rtx_control: bool,
    /// A-timeout, milliseconds; `0` means "send acks immediately".
    pub initial_a_ms: u64,
    pub fc: FcConfig,
    pub rtx: RtxConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FcConfig {
    pub max_cwq_len: usize,
    pub initial_credit: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RtxConfig {
    pub initial_tr_ms: u64,
    pub data_rxms_max: u32,
    pub mpl_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_from_json() {
        let json = serde_json::json!({
            "dtcp_present": true,
            "in_order_delivery": true,
            "max_sdu_gap": 0,
            "dtcp": {
                "flow_control": true,
                "rtx_control": true,
                "initial_a_ms": 0,
                "fc": {"max_cwq_len": 8, "initial_credit": 4},
                "rtx": {"initial_tr_ms": 1000, "data_rxms_max": 10, "mpl_ms": 1000}
            }
        });
        let config: FlowConfig = serde_json::from_value(json).unwrap();
        assert!(config.dtcp_present);
        assert_eq!(config.dtcp.fc.initial_credit, 4);
    }
}
