//! Integration tests for the UDP protocol server.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use memlink_protocol::{
    HandlerError, Instruction, InstructionClient, InstructionCode, InstructionHandler,
    ProtocolServer, ReadBlock, ServerHandle, SetupInstruction, WriteInstruction,
};
use support::Recorder;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Recording handler with switchable failure modes.
mod support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct Recorder {
        pub setups: Mutex<Vec<SetupInstruction>>,
        pub writes: Mutex<Vec<WriteInstruction>>,
        pub fail_setup: bool,
        pub panic_on_write: bool,
    }

    impl InstructionHandler for Recorder {
        fn on_setup(&self, setup: &SetupInstruction) -> Result<(), HandlerError> {
            if self.fail_setup {
                return Err("setup rejected".into());
            }
            self.setups.lock().unwrap().push(setup.clone());
            Ok(())
        }

        fn on_write(&self, write: &WriteInstruction) -> Result<(), HandlerError> {
            self.writes.lock().unwrap().push(write.clone());
            assert!(!self.panic_on_write, "write handler exploded");
            Ok(())
        }
    }
}

async fn start_server(handler: Arc<Recorder>) -> ServerHandle {
    ProtocolServer::bind("127.0.0.1:0".parse().unwrap(), handler)
        .await
        .expect("Failed to bind protocol server")
        .spawn()
}

async fn raw_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind client socket")
}

async fn recv_with_timeout(socket: &UdpSocket) -> Option<(Vec<u8>, std::net::SocketAddr)> {
    let mut buf = vec![0u8; 2048];
    match tokio::time::timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await {
        Ok(Ok((len, from))) => Some((buf[..len].to_vec(), from)),
        _ => None,
    }
}

#[tokio::test]
async fn test_ping_yields_exactly_one_response_to_sender() {
    let handle = start_server(Arc::new(Recorder::default())).await;
    let socket = raw_socket().await;

    let ping = Instruction::Ping.encode().unwrap();
    socket.send_to(&ping, handle.local_addr()).await.unwrap();

    let (reply, from) = recv_with_timeout(&socket).await.expect("No ping response");
    assert_eq!(from, handle.local_addr());
    assert_eq!(reply[4], InstructionCode::Ping.as_byte());
    assert_eq!(reply[5], 1);
    assert_eq!(Instruction::decode(&reply).unwrap(), Instruction::PingResponse);

    // No second reply
    assert!(recv_with_timeout(&socket).await.is_none());

    handle.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_setup_is_acknowledged_after_handler() {
    let recorder = Arc::new(Recorder::default());
    let handle = start_server(recorder.clone()).await;
    let client = InstructionClient::connect(handle.local_addr(), Duration::from_millis(500))
        .await
        .unwrap();

    let setup = SetupInstruction::new(vec![ReadBlock {
        position: 0,
        game_address: 0xc000,
        length: 0x2000,
    }])
    .unwrap();

    let reply = client
        .request(&Instruction::Setup(setup.clone()))
        .await
        .unwrap();
    assert_eq!(reply, Instruction::SetupResponse);
    assert_eq!(recorder.setups.lock().unwrap().as_slice(), &[setup]);

    handle.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_failed_setup_is_not_acknowledged() {
    let recorder = Arc::new(Recorder {
        fail_setup: true,
        ..Recorder::default()
    });
    let handle = start_server(recorder).await;
    let client = InstructionClient::connect(handle.local_addr(), Duration::from_millis(150))
        .await
        .unwrap();

    let result = client
        .request(&Instruction::Setup(SetupInstruction::default()))
        .await;
    assert!(result.is_err());

    // Server is still alive
    client.ping().await.unwrap();

    handle.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_handler_panic_does_not_stop_loop() {
    let recorder = Arc::new(Recorder {
        panic_on_write: true,
        ..Recorder::default()
    });
    let handle = start_server(recorder.clone()).await;
    let client = InstructionClient::connect(handle.local_addr(), Duration::from_millis(500))
        .await
        .unwrap();

    client
        .send(&Instruction::Write(WriteInstruction::new(0x10, vec![1])))
        .await
        .unwrap();
    client
        .send(&Instruction::Write(WriteInstruction::new(0x20, vec![2])))
        .await
        .unwrap();

    // The ping is answered after both writes were dispatched
    client.ping().await.unwrap();
    assert_eq!(recorder.writes.lock().unwrap().len(), 2);

    handle.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_unknown_and_malformed_datagrams_are_dropped() {
    let handle = start_server(Arc::new(Recorder::default())).await;
    let socket = raw_socket().await;

    let mut unknown = Instruction::Ping.encode().unwrap();
    unknown[4] = 0x42;
    socket.send_to(&unknown, handle.local_addr()).await.unwrap();
    socket.send_to(&[1, 2, 3], handle.local_addr()).await.unwrap();
    assert!(recv_with_timeout(&socket).await.is_none());

    // Still serving
    let ping = Instruction::Ping.encode().unwrap();
    socket.send_to(&ping, handle.local_addr()).await.unwrap();
    assert!(recv_with_timeout(&socket).await.is_some());

    handle.shutdown(Duration::from_secs(1)).await.unwrap();
}
