// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end exercise of the local IPC path: a client fd handed out by
//! [`Services::alloc_socket_fd`], through the session reader loop and
//! [`devicestatus_intention_rs::ipc::dispatch_request`], and back.

use std::os::fd::FromRawFd;

use devicestatus_intention_rs::{codec, ipc::MessageId, services::Services, session::TokenType};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};

async fn connect_client(services: &std::sync::Arc<Services>, pid: i32) -> UnixStream {
    let fd = services
        .alloc_socket_fd("test-client".to_string(), 0, pid, TokenType::Native)
        .await
        .expect("alloc socket fd");
    let std_stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
    std_stream.set_nonblocking(true).expect("set nonblocking");
    UnixStream::from_std(std_stream).expect("wrap in tokio stream")
}

#[tokio::test]
async fn get_drag_target_pid_round_trips_over_the_ipc_socket() {
    let services = Services::new_for_test("local-ipc-get-pid").await;
    let mut client = connect_client(&services, 1001).await;

    let request = codec::encode(MessageId::GetDragTargetPid.as_i32(), b"");
    client.write_all(&request).await.expect("send request");

    let mut header = [0u8; codec::HEADER_LEN];
    client.read_exact(&mut header).await.expect("read reply header");
    use zerocopy::FromBytes;
    let head = codec::PackHead::read_from_bytes(&header).expect("parse header");
    assert_eq!(head.msg_id.get(), MessageId::GetDragTargetPid.as_i32());

    let mut payload = vec![0u8; head.size.get() as usize];
    client.read_exact(&mut payload).await.expect("read reply payload");
    let pid = i32::from_le_bytes(payload.try_into().expect("4-byte pid"));
    assert_eq!(pid, -1, "no drag is active, so the target pid defaults to -1");
}

#[tokio::test]
async fn malformed_request_payload_is_reported_back_instead_of_killing_the_session() {
    let services = Services::new_for_test("local-ipc-malformed").await;
    let mut client = connect_client(&services, 1002).await;

    // StartDrag expects a JSON `StartDragRequest`; send garbage instead.
    let request = codec::encode(MessageId::StartDrag.as_i32(), b"not json");
    client.write_all(&request).await.expect("send request");

    let mut header = [0u8; codec::HEADER_LEN];
    client.read_exact(&mut header).await.expect("read reply header");
    use zerocopy::FromBytes;
    let head = codec::PackHead::read_from_bytes(&header).expect("parse header");
    assert_eq!(head.msg_id.get(), MessageId::StartDrag.as_i32());

    let mut payload = vec![0u8; head.size.get() as usize];
    client.read_exact(&mut payload).await.expect("read reply payload");
    let body: serde_json::Value = serde_json::from_slice(&payload).expect("reply is JSON");
    assert!(body.get("error").is_some(), "malformed request should produce an error reply");

    // The session itself must still be alive: a second, well-formed request
    // on the same socket gets a normal reply.
    let request = codec::encode(MessageId::GetDragTargetPid.as_i32(), b"");
    client.write_all(&request).await.expect("send second request");
    let mut header = [0u8; codec::HEADER_LEN];
    client.read_exact(&mut header).await.expect("read second reply header");
}
