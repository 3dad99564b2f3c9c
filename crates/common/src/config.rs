use serde::{Deserialize, Serialize};

/// Runtime tuning knobs shared by the dispatch and replication layers.
///
/// Defaults mirror a small-fleet deployment; every field can be overridden
/// from the deployment configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Max chunk sub-queries a single user query keeps in flight.
    #[serde(default = "default_dispatch_fan_out")]
    pub dispatch_fan_out: usize,
    /// Attempts per chunk before the query fails with chunk-unreachable.
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,
    /// Chunk-count threshold below which the scan-table annotation is dropped.
    #[serde(default = "default_scan_threshold")]
    pub scan_threshold: usize,
    /// Result receiver buffer capacity in bytes.
    #[serde(default = "default_receiver_buffer_bytes")]
    pub receiver_buffer_bytes: usize,

    /// Worker-side processing threads per worker service.
    #[serde(default = "default_worker_processing_threads")]
    pub worker_processing_threads: usize,

    /// Controller thread-pool size for request/job callbacks.
    #[serde(default = "default_controller_threads")]
    pub controller_threads: usize,
    /// Replication request expiration interval in seconds.
    #[serde(default = "default_request_expiration_ival_sec")]
    pub request_expiration_ival_sec: u64,
    /// Sleep between control-loop iterations in seconds.
    #[serde(default = "default_control_loop_ival_sec")]
    pub control_loop_ival_sec: u64,
    /// Cap on chunk-lock-conflict driven job restarts.
    #[serde(default = "default_max_lock_conflict_restarts")]
    pub max_lock_conflict_restarts: u32,

    /// Metadata-store connect timeout in seconds.
    #[serde(default = "default_store_connect_timeout_sec")]
    pub store_connect_timeout_sec: u64,
    /// Metadata-store reconnect attempts before giving up.
    #[serde(default = "default_store_max_reconnects")]
    pub store_max_reconnects: u32,
    /// Bounded retry budget for duplicate-key/deadlock upsert paths.
    #[serde(default = "default_store_retry_budget")]
    pub store_retry_budget: u32,
}

fn default_dispatch_fan_out() -> usize {
    32
}

fn default_max_chunk_retries() -> u32 {
    3
}

fn default_scan_threshold() -> usize {
    2
}

fn default_receiver_buffer_bytes() -> usize {
    64 * 1024 * 4
}

fn default_worker_processing_threads() -> usize {
    4
}

fn default_controller_threads() -> usize {
    8
}

fn default_request_expiration_ival_sec() -> u64 {
    600
}

fn default_control_loop_ival_sec() -> u64 {
    60
}

fn default_max_lock_conflict_restarts() -> u32 {
    4
}

fn default_store_connect_timeout_sec() -> u64 {
    10
}

fn default_store_max_reconnects() -> u32 {
    3
}

fn default_store_retry_budget() -> u32 {
    2
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            dispatch_fan_out: default_dispatch_fan_out(),
            max_chunk_retries: default_max_chunk_retries(),
            scan_threshold: default_scan_threshold(),
            receiver_buffer_bytes: default_receiver_buffer_bytes(),
            worker_processing_threads: default_worker_processing_threads(),
            controller_threads: default_controller_threads(),
            request_expiration_ival_sec: default_request_expiration_ival_sec(),
            control_loop_ival_sec: default_control_loop_ival_sec(),
            max_lock_conflict_restarts: default_max_lock_conflict_restarts(),
            store_connect_timeout_sec: default_store_connect_timeout_sec(),
            store_max_reconnects: default_store_max_reconnects(),
            store_retry_budget: default_store_retry_budget(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: TuningConfig = serde_json::from_str("{}").expect("empty config");
        assert_eq!(cfg.max_chunk_retries, 3);
        assert_eq!(cfg.scan_threshold, 2);
        assert_eq!(cfg.receiver_buffer_bytes, 256 * 1024);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let cfg: TuningConfig =
            serde_json::from_str(r#"{"scan_threshold": 5, "dispatch_fan_out": 8}"#).expect("cfg");
        assert_eq!(cfg.scan_threshold, 5);
        assert_eq!(cfg.dispatch_fan_out, 8);
        assert_eq!(cfg.max_chunk_retries, 3);
    }
}
