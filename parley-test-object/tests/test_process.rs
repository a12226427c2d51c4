use std::path::PathBuf;

use futures::{SinkExt, StreamExt};
use log::LevelFilter;
use tempdir::TempDir;
use tokio::{
    io::AsyncWriteExt,
    net::UnixListener,
    task::JoinHandle,
};
use tokio_util::codec::Framed;

use parley_bus_common::{Body, Message, Status, BUS_PEER_ID};
use parley_bus_lib::MessageCodec;
use parley_test_object::{
    args::Args, run, EXIT_CONNECT_FAILURE, EXIT_FAILURE, EXIT_SUCCESS, OBJECT_NAME,
};

fn init_logger() {
    let _ = pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Debug)
        .try_init();
}

fn socket_args(socket_path: PathBuf) -> Args {
    Args {
        socket: Some(socket_path),
        ..Default::default()
    }
}

/// Accept a single client, greet it and register its objects. Then write
/// `trailer` and close the connection.
/// *Returns* names of the registered objects
fn start_bus(listener: UnixListener, trailer: &'static [u8]) -> JoinHandle<Vec<Option<String>>> {
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("Failed to accept");
        let mut framed = Framed::new(stream, MessageCodec);

        framed
            .send(Message::new(0, BUS_PEER_ID, Body::Hello { client_id: 0x42 }))
            .await
            .expect("Failed to greet the client");

        let mut registered = Vec::new();
        // The test object and its watch subscriber
        for object_id in [0x100, 0x101] {
            let message = framed
                .next()
                .await
                .expect("Client disconnected")
                .expect("Invalid client message");

            match message.body {
                Body::AddObject { name, .. } => registered.push(name),
                body => panic!("Unexpected client message: {body:?}"),
            }

            framed
                .send(Message::new(
                    message.seq,
                    BUS_PEER_ID,
                    Body::ObjectAdded { object_id },
                ))
                .await
                .expect("Failed to reply");
            framed
                .send(Message::status(message.seq, BUS_PEER_ID, Status::Ok))
                .await
                .expect("Failed to reply");
        }

        framed
            .get_mut()
            .write_all(trailer)
            .await
            .expect("Failed to write");

        registered
    })
}

#[tokio::test(flavor = "current_thread")]
async fn test_bus_unreachable() {
    init_logger();

    let socket_dir = TempDir::new("parley_missing_socket").expect("Failed to create tempdir");

    let code = run(socket_args(socket_dir.path().join("parley.bus.socket"))).await;
    assert_eq!(code, EXIT_CONNECT_FAILURE);
}

#[tokio::test(flavor = "current_thread")]
async fn test_bus_disconnect() {
    init_logger();

    let socket_dir = TempDir::new("parley_bus_socket").expect("Failed to create tempdir");
    let socket_path = socket_dir.path().join("parley.bus.socket");
    let bus = start_bus(
        UnixListener::bind(&socket_path).expect("Failed to bind bus socket"),
        &[],
    );

    let code = run(socket_args(socket_path)).await;
    assert_eq!(code, EXIT_SUCCESS);

    let registered = bus.await.expect("Bus task failed");
    assert_eq!(registered, vec![Some(OBJECT_NAME.to_owned()), None]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_corrupted_stream() {
    init_logger();

    let socket_dir = TempDir::new("parley_bus_socket").expect("Failed to create tempdir");
    let socket_path = socket_dir.path().join("parley.bus.socket");
    // Negative frame length
    let bus = start_bus(
        UnixListener::bind(&socket_path).expect("Failed to bind bus socket"),
        &[0xff, 0xff, 0xff, 0xff],
    );

    let code = run(socket_args(socket_path)).await;
    assert_eq!(code, EXIT_FAILURE);

    bus.await.expect("Bus task failed");
}
