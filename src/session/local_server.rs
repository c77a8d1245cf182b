// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    os::fd::{IntoRawFd, RawFd},
    sync::{
        Arc,
        atomic::{AtomicI32, Ordering},
    },
};

use dashmap::DashMap;
use tokio::{
    io::AsyncWriteExt,
    net::UnixStream,
    sync::{Mutex, mpsc},
};
use tracing::{debug, warn};

use crate::{
    codec::NetPacket,
    netutil::configure_buffers,
    session::session::{Session, TokenType},
};

/// Up to this many nonblocking `try_read` iterations are drained per
/// readability notification before yielding back to the runtime.
const MAX_RECV_LIMIT: usize = 32;

type RecvFn = Arc<dyn Fn(Arc<Session>, NetPacket) + Send + Sync>;
type DeletedFn = Arc<dyn Fn(&Session) + Send + Sync>;

/// The local session server: owns every in-process client connection and
/// demultiplexes their inbound bytes into decoded packets.
///
/// Realizes the original's "pairs of connected stream sockets + epoll loop"
/// with a `tokio::net::UnixStream` per session and one reader task per
/// session; tokio's I/O driver is itself epoll-backed on Linux, so this is a
/// faithful async re-expression rather than a different architecture.
pub struct LocalSessionServer {
    sessions: DashMap<i32, Arc<Session>>,
    idx_pid: DashMap<i32, i32>,
    recv_fun: Mutex<Option<RecvFn>>,
    deleted_callbacks: Mutex<Vec<DeletedFn>>,
    next_fd: AtomicI32,
}

impl Default for LocalSessionServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSessionServer {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            idx_pid: DashMap::new(),
            recv_fun: Mutex::new(None),
            deleted_callbacks: Mutex::new(Vec::new()),
            next_fd: AtomicI32::new(1),
        }
    }

    /// Register the callback invoked for every decoded inbound packet.
    pub async fn set_recv_fun(&self, f: RecvFn) {
        *self.recv_fun.lock().await = Some(f);
    }

    /// Register a callback run (in registration order) whenever a session is
    /// torn down, realizing the "session-deleted callback chain".
    pub async fn on_session_deleted(&self, f: DeletedFn) {
        self.deleted_callbacks.lock().await.push(f);
    }

    pub fn get_client_fd(&self, pid: i32) -> Option<i32> {
        self.idx_pid.get(&pid).map(|v| *v)
    }

    pub fn get_client_pid(&self, fd: i32) -> Option<i32> {
        self.sessions.get(&fd).map(|s| s.pid)
    }

    pub fn session(&self, fd: i32) -> Option<Arc<Session>> {
        self.sessions.get(&fd).map(|s| Arc::clone(&s))
    }

    pub fn send_msg(&self, fd: i32, msg_id: i32, payload: &[u8]) -> bool {
        match self.session(fd) {
            Some(s) => s.send_msg(msg_id, payload).is_ok(),
            None => {
                warn!(fd, "session not found; message discarded");
                false
            },
        }
    }

    pub fn multicast(&self, fds: &[i32], msg_id: i32, payload: &[u8]) {
        for &fd in fds {
            self.send_msg(fd, msg_id, payload);
        }
    }

    /// Create a connected socket pair for a new client, register its
    /// `Session`, spawn its reader/writer tasks, and return the peer-side
    /// raw fd the caller should hand back to the client process.
    pub async fn add_socket_pair_info(
        self: &Arc<Self>,
        program_name: String,
        uid: u32,
        pid: i32,
        token_type: TokenType,
    ) -> std::io::Result<RawFd> {
        let (server_std, client_std) = std::os::unix::net::UnixStream::pair()?;
        let buf_size = token_type.recv_buf_size();
        configure_buffers(&server_std, buf_size, buf_size)?;
        configure_buffers(&client_std, buf_size, buf_size)?;

        server_std.set_nonblocking(true)?;
        let server = UnixStream::from_std(server_std)?;

        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(fd, pid, uid, program_name, token_type, tx));

        self.sessions.insert(fd, Arc::clone(&session));
        self.idx_pid.insert(pid, fd);

        let (read_half, write_half) = server.into_split();
        let server_self = Arc::clone(self);
        tokio::spawn(Self::writer_loop(write_half, rx));
        tokio::spawn(Self::reader_loop(server_self, Arc::clone(&session), read_half));

        debug!(fd, pid, "session connected");
        Ok(client_std.into_raw_fd())
    }

    async fn writer_loop(
        mut write_half: tokio::net::unix::OwnedWriteHalf,
        mut rx: mpsc::UnboundedReceiver<bytes::Bytes>,
    ) {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = write_half.write_all(&bytes).await {
                warn!(error = %e, "session write failed");
                return;
            }
        }
    }

    async fn reader_loop(
        server: Arc<LocalSessionServer>,
        session: Arc<Session>,
        read_half: tokio::net::unix::OwnedReadHalf,
    ) {
        let mut scratch = [0u8; 4096];
        loop {
            if read_half.readable().await.is_err() {
                break;
            }

            let mut made_progress = false;
            for _ in 0..MAX_RECV_LIMIT {
                match read_half.try_read(&mut scratch) {
                    Ok(0) => {
                        server.release_session(session.fd).await;
                        return;
                    },
                    Ok(n) => {
                        made_progress = true;
                        match session.ingest(&scratch[..n]) {
                            Ok(packets) => {
                                let recv_fun = server.recv_fun.lock().await.clone();
                                if let Some(f) = recv_fun {
                                    for pkt in packets {
                                        f(Arc::clone(&session), pkt);
                                    }
                                }
                            },
                            Err(()) => {
                                warn!(fd = session.fd, "corrupted stream; closing session");
                                server.release_session(session.fd).await;
                                return;
                            },
                        }
                    },
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!(fd = session.fd, error = %e, "session read error");
                        server.release_session(session.fd).await;
                        return;
                    },
                }
            }
            if !made_progress {
                // Readable woke us up but try_read returned WouldBlock
                // immediately; avoid a busy loop.
                tokio::task::yield_now().await;
            }
        }
    }

    async fn release_session(&self, fd: i32) {
        if let Some((_, session)) = self.sessions.remove(&fd) {
            self.idx_pid.remove(&session.pid);
            let callbacks = self.deleted_callbacks.lock().await;
            for cb in callbacks.iter() {
                cb(&session);
            }
            debug!(fd, "session disconnected");
        }
    }

    /// Close every session. Callers must first stop accepting new
    /// `add_socket_pair_info` requests at the gateway layer so ingress is
    /// quiesced before sessions are torn down out from under their reader
    /// tasks.
    pub async fn shutdown(&self) {
        let fds: Vec<i32> = self.sessions.iter().map(|e| *e.key()).collect();
        for fd in fds {
            self.release_session(fd).await;
        }
    }
}
