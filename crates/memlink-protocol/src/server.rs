//! Loopback UDP endpoint for push-style integrations.
//!
//! The server receives one datagram at a time and only re-arms the receive
//! after the current datagram has been dispatched, so handler calls never
//! overlap. PING is answered directly; SETUP is acknowledged with a
//! SETUP response once `on_setup` succeeds. Unknown codes are dropped.

use crate::cancel::CancellationToken;
use crate::error::{ProtocolError, Result};
use crate::instruction::{
    FreezeInstruction, Instruction, MAX_DATAGRAM_SIZE, SetupInstruction, UnfreezeInstruction,
    WriteInstruction,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Fixed port of the protocol server
pub const DEFAULT_SERVER_PORT: u16 = 55356;

/// Default bind address: loopback on [`DEFAULT_SERVER_PORT`]
pub const DEFAULT_SERVER_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_SERVER_PORT);

/// Error type returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callbacks invoked for inbound instructions.
///
/// Calls are serialized by the receive loop. Errors and panics are caught
/// at the dispatch boundary and logged; they never stop the server.
pub trait InstructionHandler: Send + Sync {
    /// A peer declared the windows it mirrors.
    fn on_setup(&self, setup: &SetupInstruction) -> std::result::Result<(), HandlerError>;

    /// A peer asked for bytes to be written.
    fn on_write(&self, write: &WriteInstruction) -> std::result::Result<(), HandlerError>;

    /// A peer froze an address. Ignored unless overridden.
    fn on_freeze(&self, _freeze: &FreezeInstruction) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    /// A peer released a frozen address. Ignored unless overridden.
    fn on_unfreeze(
        &self,
        _unfreeze: &UnfreezeInstruction,
    ) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    /// The peer is ending its session.
    fn on_close(&self) {}
}

/// UDP protocol server bound to a loopback address.
pub struct ProtocolServer {
    socket: UdpSocket,
    handler: Arc<dyn InstructionHandler>,
    local_addr: SocketAddr,
}

impl ProtocolServer {
    /// Bind the server socket.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::NonLoopbackBind` for addresses other than
    /// loopback and `ProtocolError::BindFailed` if the port is taken.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn InstructionHandler>) -> Result<Self> {
        if !addr.ip().is_loopback() {
            return Err(ProtocolError::NonLoopbackBind(addr));
        }

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ProtocolError::BindFailed { addr, source })?;
        let local_addr = socket.local_addr()?;

        tracing::info!("Protocol server listening on {local_addr}");

        Ok(Self {
            socket,
            handler,
            local_addr,
        })
    }

    /// Address the socket is bound to
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the receive loop on a background task.
    pub fn spawn(self) -> ServerHandle {
        let token = CancellationToken::new();
        let local_addr = self.local_addr;
        let worker_token = token.clone();
        let task = tokio::spawn(async move { self.run(worker_token).await });

        ServerHandle {
            token,
            task,
            local_addr,
        }
    }

    /// Receive and dispatch datagrams until `token` is cancelled.
    ///
    /// The socket is released when this returns.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            if token.is_cancelled() {
                break;
            }

            let received = tokio::select! {
                () = token.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, peer)) => self.dispatch(&buf[..len], peer).await,
                Err(e) => {
                    // ICMP port-unreachable from a vanished peer surfaces here on some platforms
                    tracing::warn!("UDP receive on {} failed: {e}", self.local_addr);
                }
            }
        }

        tracing::info!("Protocol server on {} stopped", self.local_addr);
        Ok(())
    }

    async fn dispatch(&self, datagram: &[u8], peer: SocketAddr) {
        let instruction = match Instruction::decode(datagram) {
            Ok(instruction) => instruction,
            Err(ProtocolError::UnknownInstruction(code)) => {
                tracing::debug!("Dropping unknown instruction {code:#04x} from {peer}");
                return;
            }
            Err(e) => {
                tracing::warn!("Dropping datagram from {peer}: {e}");
                return;
            }
        };

        tracing::trace!(
            "Received {} ({} bytes) from {peer}",
            instruction.code().name(),
            datagram.len()
        );

        match instruction {
            Instruction::Ping => self.reply(&Instruction::PingResponse, peer).await,
            Instruction::Setup(setup) => {
                if self.invoke("setup", peer, |h| h.on_setup(&setup)) {
                    self.reply(&Instruction::SetupResponse, peer).await;
                }
            }
            Instruction::Write(write) => {
                self.invoke("write", peer, |h| h.on_write(&write));
            }
            Instruction::Freeze(freeze) => {
                self.invoke("freeze", peer, |h| h.on_freeze(&freeze));
            }
            Instruction::Unfreeze(unfreeze) => {
                self.invoke("unfreeze", peer, |h| h.on_unfreeze(&unfreeze));
            }
            Instruction::Close => {
                self.invoke("close", peer, |h| {
                    h.on_close();
                    Ok(())
                });
            }
            Instruction::Noop | Instruction::PingResponse | Instruction::SetupResponse => {}
        }
    }

    /// Run a handler callback, returning whether it succeeded.
    fn invoke<F>(&self, kind: &str, peer: SocketAddr, f: F) -> bool
    where
        F: FnOnce(&dyn InstructionHandler) -> std::result::Result<(), HandlerError>,
    {
        let handler = self.handler.as_ref();
        match std::panic::catch_unwind(AssertUnwindSafe(|| f(handler))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!("{kind} handler failed for datagram from {peer}: {e}");
                false
            }
            Err(_) => {
                tracing::error!("{kind} handler panicked for datagram from {peer}");
                false
            }
        }
    }

    async fn reply(&self, instruction: &Instruction, peer: SocketAddr) {
        let bytes = match instruction.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to encode {}: {e}", instruction.code().name());
                return;
            }
        };

        if let Err(e) = self.socket.send_to(&bytes, peer).await {
            tracing::warn!("Failed to send {} to {peer}: {e}", instruction.code().name());
        }
    }
}

/// Owner handle for a spawned [`ProtocolServer`].
pub struct ServerHandle {
    token: CancellationToken,
    task: JoinHandle<Result<()>>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Address the server is bound to
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops the server when cancelled
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request a cooperative stop and wait up to `timeout` for the loop to exit.
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        self.token.cancel();

        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ProtocolError::Shutdown(e.to_string())),
            Err(_) => Err(ProtocolError::ShutdownTimeout {
                millis: timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Noop;

    impl InstructionHandler for Noop {
        fn on_setup(&self, _setup: &SetupInstruction) -> std::result::Result<(), HandlerError> {
            Ok(())
        }

        fn on_write(&self, _write: &WriteInstruction) -> std::result::Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn test_default_addr_is_loopback() {
        assert!(DEFAULT_SERVER_ADDR.ip().is_loopback());
        assert_eq!(DEFAULT_SERVER_ADDR.port(), 55356);
    }

    #[tokio::test]
    async fn test_bind_rejects_non_loopback() {
        let addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let result = ProtocolServer::bind(addr, Arc::new(Noop)).await;
        assert!(matches!(result, Err(ProtocolError::NonLoopbackBind(_))));
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let server = ProtocolServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(Noop))
            .await
            .unwrap();
        let addr = server.local_addr();
        let handle = server.spawn();

        handle.shutdown(Duration::from_secs(1)).await.unwrap();

        // Port can be bound again once the loop has exited
        let rebound = UdpSocket::bind(addr).await;
        assert!(rebound.is_ok());
    }
}
