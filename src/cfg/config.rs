// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Identity and session limits for the local IPC server.
    pub runtime: RuntimeConfig,
    /// Raw socket tunables applied to every soft-bus peer connection.
    pub socket: SocketConfig,
    /// Soft-bus adapter settings (where its `AF_UNIX` endpoints live).
    pub softbus: SoftbusConfig,
    /// Timeouts governing coordination session setup and request/response
    /// correlation.
    pub timeouts: TimeoutConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings with no wire representation.
pub struct RuntimeConfig {
    #[serde(rename = "LocalNetworkId")]
    /// This device's soft-bus `networkId`, advertised to peers during the
    /// bind handshake and used as the coordination state machine's local
    /// identity.
    pub local_network_id: String,

    #[serde(rename = "MaxSessions")]
    /// External limit on the number of simultaneously tracked local IPC
    /// sessions.
    pub max_sessions: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// `SO_SNDBUF`/`SO_RCVBUF`/keepalive tunables applied via [`crate::netutil`].
pub struct SocketConfig {
    #[serde(rename = "SendBufferBytes")]
    /// Default send buffer size for ordinary clients.
    pub send_buffer_bytes: usize,

    #[serde(rename = "RecvBufferBytes")]
    /// Default receive buffer size for ordinary clients.
    pub recv_buffer_bytes: usize,

    #[serde(rename = "NativeRecvBufferBytes")]
    /// Receive buffer size reserved for native-token clients, who are
    /// trusted with a larger in-flight window.
    pub native_recv_buffer_bytes: usize,

    #[serde(rename = "KeepaliveIdle", with = "serde_secs")]
    /// Seconds of idleness before the first keepalive probe.
    pub keepalive_idle: Duration,

    #[serde(rename = "KeepaliveInterval", with = "serde_secs")]
    /// Seconds between keepalive probes.
    pub keepalive_interval: Duration,

    #[serde(rename = "KeepaliveProbes")]
    /// Number of unacknowledged probes before the peer is considered dead.
    pub keepalive_probes: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Where the soft-bus adapter's `AF_UNIX` stand-in endpoints live.
pub struct SoftbusConfig {
    #[serde(rename = "BaseDir")]
    /// Directory holding the named sockets this adapter binds and connects
    /// to. Each test gets its own temporary directory; production uses a
    /// fixed runtime directory.
    pub base_dir: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Durations bounding coordination and drag setup steps.
pub struct TimeoutConfig {
    #[serde(rename = "SessionOpenMs")]
    /// Upper bound on waiting for a soft-bus session to finish opening
    /// before `start_cooperate` gives up.
    pub session_open_ms: u64,

    #[serde(rename = "ExchangeMs")]
    /// Upper bound on waiting for a peer's reply to a coordination request
    /// (start/stop) before the call times out.
    pub exchange_ms: u64,

    #[serde(rename = "StopDragMs")]
    /// How long the drag state machine waits, after `PULL_UP`, for the
    /// client to report a drop result before forcing `stop_drag(EXCEPTION)`.
    pub stop_drag_ms: u64,

    #[serde(rename = "MouseDragMonitorMs")]
    /// How long the pre-drag mouse-drag-monitor window stays armed after
    /// `set_mouse_drag_monitor_state(true)` before it self-disarms.
    pub mouse_drag_monitor_ms: u64,
}

impl TimeoutConfig {
    pub fn session_open(&self) -> Duration {
        Duration::from_millis(self.session_open_ms)
    }

    pub fn exchange(&self) -> Duration {
        Duration::from_millis(self.exchange_ms)
    }

    pub fn stop_drag(&self) -> Duration {
        Duration::from_millis(self.stop_drag_ms)
    }

    pub fn mouse_drag_monitor(&self) -> Duration {
        Duration::from_millis(self.mouse_drag_monitor_ms)
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.runtime.local_network_id.is_empty(),
            "LocalNetworkId must not be empty"
        );
        ensure!(self.runtime.max_sessions >= 1, "MaxSessions must be >= 1");
        ensure!(
            self.socket.send_buffer_bytes > 0,
            "SendBufferBytes must be > 0"
        );
        ensure!(
            self.socket.recv_buffer_bytes > 0,
            "RecvBufferBytes must be > 0"
        );
        ensure!(
            self.socket.native_recv_buffer_bytes >= self.socket.recv_buffer_bytes,
            "NativeRecvBufferBytes must be >= RecvBufferBytes"
        );
        ensure!(
            !self.softbus.base_dir.is_empty(),
            "BaseDir must not be empty"
        );
        ensure!(self.timeouts.session_open_ms > 0, "SessionOpenMs must be > 0");
        ensure!(self.timeouts.exchange_ms > 0, "ExchangeMs must be > 0");
        ensure!(self.timeouts.stop_drag_ms > 0, "StopDragMs must be > 0");
        ensure!(self.timeouts.mouse_drag_monitor_ms > 0, "MouseDragMonitorMs must be > 0");
        Ok(())
    }
}

impl Default for Config {
    /// Defaults mirroring §6's documented tunables, used by
    /// `Services::new_for_test` so tests never depend on a config file on
    /// disk.
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig {
                local_network_id: "local-device".to_string(),
                max_sessions: 64,
            },
            socket: SocketConfig {
                send_buffer_bytes: 32 * 1024,
                recv_buffer_bytes: 32 * 1024,
                native_recv_buffer_bytes: 64 * 1024,
                keepalive_idle: Duration::from_secs(10),
                keepalive_interval: Duration::from_secs(1),
                keepalive_probes: 5,
            },
            softbus: SoftbusConfig { base_dir: std::env::temp_dir().to_string_lossy().into_owned() },
            timeouts: TimeoutConfig {
                session_open_ms: 5_000,
                exchange_ms: 3_000,
                stop_drag_ms: 3_000,
                mouse_drag_monitor_ms: 3_000,
            },
        }
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
