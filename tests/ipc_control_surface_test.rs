//! End-to-end IPC control surface test: a real `ipc::server::run` listener
//! in front of a real `Coordinator` (driven by `NullOutputSink` so no sound
//! card is required), exercised over an actual TCP socket.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use waver::config::EngineConfig;
use waver::coordinator::Coordinator;
use waver::output::NullOutputSink;

async fn read_one_frame(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut byte))
            .await
            .expect("timed out waiting for a reply")
            .unwrap();
        assert_ne!(n, 0, "connection closed before a full frame arrived");
        if byte[0] == waver::ipc::protocol::RECORD_SEPARATOR {
            break;
        }
        buf.push(byte[0]);
    }
    String::from_utf8(buf).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn are_you_alive_and_pause_resume_round_trip() {
    let config = EngineConfig { control_port: 0, ..EngineConfig::default() };
    let output = NullOutputSink::new(44_100);
    let (coordinator, handle) =
        Coordinator::new(config, Vec::new(), output, tokio::runtime::Handle::current());

    // Bind on an ephemeral port ourselves so the test doesn't collide with a
    // real engine instance, then hand the listener's port to the server.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener); // release it; ipc::run rebinds the same ephemeral port

    tokio::spawn(coordinator.run());
    let commands = handle.commands.clone();
    tokio::spawn(waver::ipc::run(port, commands, handle.events));

    // Give the listener a moment to bind before connecting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(b"are_you_alive\x1e").await.unwrap();
    let reply = read_one_frame(&mut client).await;
    assert!(reply.starts_with("im_alive"));

    client.write_all(b"pause\x1e").await.unwrap();
    let event = read_one_frame(&mut client).await;
    assert_eq!(event, "paused");

    client.write_all(b"resume\x1e").await.unwrap();
    let event = read_one_frame(&mut client).await;
    assert_eq!(event, "resumed");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_url_like_message_enqueues_a_track() {
    let config = EngineConfig { control_port: 0, ..EngineConfig::default() };
    let output = NullOutputSink::new(44_100);
    let (coordinator, handle) =
        Coordinator::new(config, Vec::new(), output, tokio::runtime::Handle::current());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    tokio::spawn(coordinator.run());
    let commands = handle.commands.clone();
    tokio::spawn(waver::ipc::run(port, commands, handle.events));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(b"/music/track.mp3\x1e").await.unwrap();

    // The enqueue itself doesn't reply over this connection (only events
    // broadcast do), so give the Coordinator a moment to process it and
    // confirm the connection is still alive and well rather than erroring.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.write_all(b"are_you_alive\x1e").await.unwrap();
    let reply = read_one_frame(&mut client).await;
    assert!(reply.starts_with("im_alive"));
}
