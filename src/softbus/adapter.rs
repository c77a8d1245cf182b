// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, Weak},
};

use tokio::{io::AsyncReadExt, net::UnixListener, sync::mpsc};
use tracing::{debug, warn};

use crate::{
    codec::{self, NetPacket},
    error::{MAX_PACKET_BUF_SIZE, Result, ServiceError},
    netutil::{configure_buffers, configure_keepalive},
    softbus::{
        CLIENT_NAME_NETWORK_ID_CHARS, CLIENT_SESSION_NAME_PREFIX, KEEPALIVE,
        SERVER_SESSION_NAME, observer::SoftbusObserver, peer::Peer,
    },
};

/// Reserved internal message id carrying the connecting peer's `networkId`
/// as its very first packet on a freshly accepted socket; the real
/// soft-bus kernel performs this binding out of band, this stand-in does it
/// in-band since it runs over plain `AF_UNIX` sockets.
const BIND_HELLO_MSG_ID: i32 = -1;

struct Inner {
    peers: HashMap<String, Arc<Peer>>,
    observers: Vec<Weak<dyn SoftbusObserver>>,
    enabled: bool,
}

/// Peer-to-peer byte transport keyed by `networkId`. A stand-in for the
/// distributed soft-bus kernel: peers are realized as named `AF_UNIX`
/// sockets under `base_dir`, which is sufficient to exercise the adapter's
/// real contract (bind/shutdown notification, packet demux, `networkId`
/// uniqueness) without depending on actual distributed hardware.
pub struct SoftbusAdapter {
    inner: Mutex<Inner>,
    base_dir: PathBuf,
}

impl SoftbusAdapter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                peers: HashMap::new(),
                observers: Vec::new(),
                enabled: false,
            }),
            base_dir: base_dir.into(),
        })
    }

    pub fn add_observer(&self, observer: Weak<dyn SoftbusObserver>) {
        let mut inner = self.inner.lock().expect("softbus lock poisoned");
        inner.observers.retain(|o| o.upgrade().is_some());
        inner.observers.push(observer);
    }

    pub fn remove_observer(&self, observer: &Weak<dyn SoftbusObserver>) {
        let mut inner = self.inner.lock().expect("softbus lock poisoned");
        inner.observers.retain(|o| {
            !std::ptr::addr_eq(o.as_ptr(), observer.as_ptr()) && o.upgrade().is_some()
        });
    }

    /// Bring up the server-side named socket and start accepting peer
    /// binds. Idempotent.
    pub async fn enable(self: &Arc<Self>) -> std::io::Result<()> {
        {
            let mut inner = self.inner.lock().expect("softbus lock poisoned");
            if inner.enabled {
                return Ok(());
            }
            inner.enabled = true;
        }
        let path = self.socket_path(SERVER_SESSION_NAME);
        self.spawn_listener(path).await
    }

    pub async fn disable(&self) {
        let (peers, enabled) = {
            let mut inner = self.inner.lock().expect("softbus lock poisoned");
            inner.enabled = false;
            (std::mem::take(&mut inner.peers), true)
        };
        let _ = enabled;
        for (network_id, peer) in peers {
            debug!(network_id, "shutdown on disable");
            self.notify_shutdown(&network_id);
            drop(peer);
        }
        let _ = std::fs::remove_file(self.socket_path(SERVER_SESSION_NAME));
    }

    /// Client-side: stand up this device's named receive endpoint for a
    /// given remote. A no-op if already open, matching the original's
    /// idempotent `OpenSessionLocked`.
    pub async fn open_session(self: &Arc<Self>, network_id: &str) -> Result<()> {
        if network_id.is_empty() || network_id.len() > 64 {
            return Err(ServiceError::InvalidParam("networkId length".into()));
        }
        {
            let inner = self.inner.lock().expect("softbus lock poisoned");
            if inner.peers.contains_key(network_id) {
                return Ok(());
            }
        }
        let truncated: String =
            network_id.chars().take(CLIENT_NAME_NETWORK_ID_CHARS).collect();
        let name = format!("{CLIENT_SESSION_NAME_PREFIX}{truncated}");
        let path = self.socket_path(&name);
        self.spawn_listener(path)
            .await
            .map_err(|e| ServiceError::Exception(e.to_string()))
    }

    pub async fn close_session(&self, network_id: &str) {
        let peer = {
            let mut inner = self.inner.lock().expect("softbus lock poisoned");
            inner.peers.remove(network_id)
        };
        if peer.is_some() {
            self.notify_shutdown(network_id);
        }
    }

    pub fn send_packet(&self, network_id: &str, packet: &NetPacket) -> Result<()> {
        let peer = {
            let inner = self.inner.lock().expect("softbus lock poisoned");
            inner.peers.get(network_id).cloned()
        }
        .ok_or_else(|| ServiceError::NotConnected(network_id.to_string()))?;

        let wire = codec::encode(packet.msg_id, &packet.payload);
        if wire.len() > MAX_PACKET_BUF_SIZE {
            return Err(ServiceError::TooLarge { size: wire.len(), max: MAX_PACKET_BUF_SIZE });
        }
        if !peer.send_raw(wire) {
            return Err(ServiceError::MsgSendFail(format!(
                "peer {network_id} write queue closed"
            )));
        }
        Ok(())
    }

    fn socket_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name.replace('/', "_"))
    }

    async fn spawn_listener(self: &Arc<Self>, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let adapter = Arc::clone(&adapter);
                        tokio::spawn(async move {
                            adapter.handle_incoming(stream).await;
                        });
                    },
                    Err(e) => {
                        warn!(error = %e, "softbus accept failed");
                        break;
                    },
                }
            }
        });
        Ok(())
    }

    async fn handle_incoming(self: Arc<Self>, stream: tokio::net::UnixStream) {
        configure_keepalive(&stream, KEEPALIVE.idle, KEEPALIVE.interval, KEEPALIVE.probes);
        let buf_size = MAX_PACKET_BUF_SIZE;
        let _ = configure_buffers(&stream, buf_size, buf_size);

        let (mut read_half, write_half) = stream.into_split();

        let Ok(network_id) = read_bind_hello(&mut read_half).await else {
            warn!("softbus peer failed handshake");
            return;
        };

        let already_bound = {
            let inner = self.inner.lock().expect("softbus lock poisoned");
            inner.peers.contains_key(&network_id)
        };
        if already_bound {
            debug!(network_id, "duplicate bind ignored");
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<bytes::Bytes>();
        let peer = Arc::new(Peer::new(network_id.clone(), tx));

        {
            let mut inner = self.inner.lock().expect("softbus lock poisoned");
            inner.peers.insert(network_id.clone(), Arc::clone(&peer));
        }
        self.notify_bind(&network_id);

        let mut write_half = write_half;
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            while let Some(bytes) = rx.recv().await {
                if write_half.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        });

        let mut scratch = [0u8; 4096];
        loop {
            match read_half.read(&mut scratch).await {
                Ok(0) => break,
                Ok(n) => match peer.ingest(&scratch[..n]) {
                    Ok(packets) => {
                        for pkt in packets {
                            self.dispatch_to_observers(&network_id, &pkt);
                        }
                    },
                    Err(_) => {
                        warn!(network_id, "corrupted stream; closing only this peer");
                        break;
                    },
                },
                Err(_) => break,
            }
        }

        {
            let mut inner = self.inner.lock().expect("softbus lock poisoned");
            inner.peers.remove(&network_id);
        }
        self.notify_shutdown(&network_id);
    }

    fn dispatch_to_observers(&self, network_id: &str, packet: &NetPacket) {
        let observers: Vec<Weak<dyn SoftbusObserver>> = {
            let inner = self.inner.lock().expect("softbus lock poisoned");
            inner.observers.clone()
        };
        for weak in observers {
            if let Some(observer) = weak.upgrade()
                && observer.on_packet(network_id, packet)
            {
                break;
            }
        }
    }

    fn notify_bind(&self, network_id: &str) {
        let observers: Vec<Weak<dyn SoftbusObserver>> = {
            let inner = self.inner.lock().expect("softbus lock poisoned");
            inner.observers.clone()
        };
        for weak in observers {
            if let Some(observer) = weak.upgrade() {
                observer.on_bind(network_id);
            }
        }
    }

    fn notify_shutdown(&self, network_id: &str) {
        let observers: Vec<Weak<dyn SoftbusObserver>> = {
            let inner = self.inner.lock().expect("softbus lock poisoned");
            inner.observers.clone()
        };
        for weak in observers {
            if let Some(observer) = weak.upgrade() {
                observer.on_shutdown(network_id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn connect_for_test(
        self: &Arc<Self>,
        target_name: &str,
        local_network_id: &str,
    ) -> std::io::Result<tokio::net::UnixStream> {
        let path = self.socket_path(target_name);
        let mut stream = tokio::net::UnixStream::connect(&path).await?;
        use tokio::io::AsyncWriteExt;
        let hello = codec::encode(BIND_HELLO_MSG_ID, local_network_id.as_bytes());
        stream.write_all(&hello).await?;
        Ok(stream)
    }
}

async fn read_bind_hello(
    read_half: &mut tokio::net::unix::OwnedReadHalf,
) -> std::io::Result<String> {
    let mut header = [0u8; codec::HEADER_LEN];
    read_half.read_exact(&mut header).await?;
    let size = {
        use zerocopy::FromBytes;
        codec::PackHead::read_from_bytes(&header)
            .map_err(|_| std::io::Error::other("bad handshake header"))?
            .size
            .get()
    };
    if size < 0 || size as usize > MAX_PACKET_BUF_SIZE {
        return Err(std::io::Error::other("bad handshake size"));
    }
    let mut payload = vec![0u8; size as usize];
    read_half.read_exact(&mut payload).await?;
    String::from_utf8(payload).map_err(|_| std::io::Error::other("bad handshake payload"))
}
