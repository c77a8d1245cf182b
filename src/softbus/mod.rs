// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Peer-to-peer byte transport keyed by `networkId`, standing in for the
//! distributed soft-bus. Exposes bind/shutdown callbacks to a set of weakly
//! held observers and per-peer framed packet demultiplexing.

pub mod adapter;
pub mod observer;
pub mod peer;

pub use adapter::SoftbusAdapter;
pub use observer::SoftbusObserver;
pub use peer::Peer;

pub const SERVER_SESSION_NAME: &str = "ohos.msdp.device_status.intention.serversession";
pub const CLIENT_SESSION_NAME_PREFIX: &str =
    "ohos.msdp.device_status.intention.clientsession.";
pub const CLIENT_NAME_NETWORK_ID_CHARS: usize = 15;

/// TCP keepalive tuning applied to every bound peer socket.
pub struct KeepAliveTuning {
    pub idle: std::time::Duration,
    pub interval: std::time::Duration,
    pub probes: u32,
}

pub const KEEPALIVE: KeepAliveTuning = KeepAliveTuning {
    idle: std::time::Duration::from_secs(10),
    interval: std::time::Duration::from_secs(1),
    probes: 5,
};

/// QoS intent recorded for a client-opened session. The soft-bus transport
/// itself enforces this; here it is advisory metadata only.
#[derive(Debug, Clone, Copy)]
pub struct QosHint {
    pub min_bandwidth_bytes_per_sec: u64,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
}

pub const DEFAULT_QOS: QosHint = QosHint {
    min_bandwidth_bytes_per_sec: 80 * 1024 * 1024,
    min_latency_ms: 1600,
    max_latency_ms: 1600,
};
