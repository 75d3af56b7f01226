//! Wire Framing Tests
//!
//! A raw socket on one side checks the exact bytes a channel reads and
//! writes for the supported length headers.

mod common;

use channels::sinks::{BytesFormatter, DelimitedFormatter, FormatterSink};
use channels::{
    AsciiLengthHeader, BinaryLengthHeader, Channel, ChannelStatus, Endianness, NoHeader, Pipeline,
    ServerChannel,
};
use bytes::Bytes;
use common::*;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const FRAME: &[u8] = b"025Hello world from client!\n";

async fn ascii_server() -> ServerChannel<String> {
    ServerChannel::builder()
        .bind("127.0.0.1:0")
        .header(AsciiLengthHeader::new(3).unwrap())
        .pipeline(text_pipeline())
        .start()
        .await
        .unwrap()
}

async fn write_in_chunks(stream: &mut TcpStream, bytes: &[u8], sizes: &[usize]) {
    let mut offset = 0;
    for size in sizes {
        let end = (offset + size).min(bytes.len());
        stream.write_all(&bytes[offset..end]).await.unwrap();
        stream.flush().await.unwrap();
        offset = end;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    stream.write_all(&bytes[offset..]).await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_ascii_header_frame_split_one_and_rest() {
    let server = ascii_server().await;
    let mut raw = TcpStream::connect(server.local_endpoint()).await.unwrap();

    write_in_chunks(&mut raw, FRAME, &[1, 27]).await;

    let delivery = within(server.receive(None)).await.unwrap().unwrap();
    let descriptor = delivery.as_received().unwrap();
    assert_eq!(descriptor.message(), "Hello world from client!\n");

    // Echo back: the server frames with the same header
    let reply = server.send_to(descriptor.source(), descriptor.message().clone());
    assert!(reply.wait_completion(Some(WAIT), false).await);

    let mut echoed = vec![0u8; FRAME.len()];
    within(raw.read_exact(&mut echoed)).await.unwrap();
    assert_eq!(echoed, FRAME);

    server.close();
}

#[test_log::test(tokio::test)]
async fn test_ascii_header_frame_byte_by_byte() {
    let server = ascii_server().await;
    let mut raw = TcpStream::connect(server.local_endpoint()).await.unwrap();

    let sizes = vec![1; FRAME.len() - 1];
    write_in_chunks(&mut raw, FRAME, &sizes).await;

    let delivery = within(server.receive(None)).await.unwrap().unwrap();
    assert_eq!(
        delivery.as_received().unwrap().message(),
        "Hello world from client!\n"
    );

    server.close();
}

#[test_log::test(tokio::test)]
async fn test_two_frames_in_one_write() {
    let server = ascii_server().await;
    let mut raw = TcpStream::connect(server.local_endpoint()).await.unwrap();

    raw.write_all(b"003one005three").await.unwrap();

    let first = within(server.receive(None)).await.unwrap().unwrap();
    let second = within(server.receive(None)).await.unwrap().unwrap();
    let mut messages = vec![
        first.as_received().unwrap().message().clone(),
        second.as_received().unwrap().message().clone(),
    ];
    messages.sort();
    assert_eq!(messages, ["one", "three"]);

    server.close();
}

#[test_log::test(tokio::test)]
async fn test_heartbeat_frames_are_not_delivered() {
    let server = ascii_server().await;
    let mut raw = TcpStream::connect(server.local_endpoint()).await.unwrap();

    raw.write_all(b"000000002ok").await.unwrap();

    let delivery = within(server.receive(None)).await.unwrap().unwrap();
    assert_eq!(delivery.as_received().unwrap().message(), "ok");
    let nothing = server.receive(Some(Duration::from_millis(50))).await.unwrap();
    assert!(nothing.is_none());

    server.close();
}

#[test_log::test(tokio::test)]
async fn test_invalid_ascii_header_drops_connection() {
    let server = ascii_server().await;
    let mut raw = TcpStream::connect(server.local_endpoint()).await.unwrap();
    assert!(eventually(|| server.child_count() == 1).await);

    raw.write_all(b"x12abc").await.unwrap();

    assert!(eventually(|| server.child_count() == 0).await);
    let mut rest = Vec::new();
    let read = within(raw.read_to_end(&mut rest)).await;
    assert!(read.is_err() || rest.is_empty());

    server.close();
}

#[test_log::test(tokio::test)]
async fn test_little_endian_two_byte_header_on_the_wire() {
    let (left, mut raw) = tokio::io::duplex(1024);
    let channel = Channel::builder()
        .header(BinaryLengthHeader::new(2, Endianness::Little).unwrap())
        .pipeline(Pipeline::new().with(FormatterSink::new(BytesFormatter)))
        .build();
    channel.attach(left).unwrap();

    let sent = channel.send(Bytes::from_static(b"abc"));
    assert!(sent.wait_completion(Some(WAIT), false).await);

    let mut wire = [0u8; 5];
    within(raw.read_exact(&mut wire)).await.unwrap();
    assert_eq!(&wire, &[3, 0, b'a', b'b', b'c']);

    raw.write_all(&[2, 0, b'h', b'i']).await.unwrap();
    let delivery = within(channel.receive(None)).await.unwrap().unwrap();
    assert_eq!(delivery.as_received().unwrap().message(), &Bytes::from_static(b"hi"));

    drop(raw);
    assert!(channel.wait_for_status(ChannelStatus::Disconnected, WAIT).await);
}

#[test_log::test(tokio::test)]
async fn test_oversized_frame_rejected_on_send() {
    let (left, _raw) = tokio::io::duplex(1024);
    let channel = Channel::builder()
        .header(BinaryLengthHeader::new(1, Endianness::Big).unwrap())
        .pipeline(Pipeline::new().with(FormatterSink::new(BytesFormatter)))
        .build();
    channel.attach(left).unwrap();

    let operation = channel.send(Bytes::from(vec![0u8; 300]));
    assert!(operation.is_completed());
    assert!(!operation.is_succeeded());
    assert!(channel.is_connected());
}

#[test_log::test(tokio::test)]
async fn test_headerless_lines_split_across_reads() {
    let (left, mut raw) = tokio::io::duplex(1024);
    let channel = Channel::builder()
        .header(NoHeader)
        .pipeline(Pipeline::new().with(FormatterSink::new(DelimitedFormatter::default())))
        .build();
    channel.attach(left).unwrap();

    for chunk in [&b"hel"[..], b"lo\nwor", b"ld\nthi", b"r", b"d\n"] {
        raw.write_all(chunk).await.unwrap();
        raw.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for expected in ["hello", "world", "third"] {
        let delivery = within(channel.receive(None)).await.unwrap().unwrap();
        assert_eq!(delivery.as_received().unwrap().message(), expected);
    }
    let nothing = channel.receive(Some(Duration::from_millis(50))).await.unwrap();
    assert!(nothing.is_none());

    // Outbound lines carry only the delimiter
    let sent = channel.send("reply".to_string());
    assert!(sent.wait_completion(Some(WAIT), false).await);
    let mut wire = [0u8; 6];
    within(raw.read_exact(&mut wire)).await.unwrap();
    assert_eq!(&wire, b"reply\n");

    channel.close();
}
