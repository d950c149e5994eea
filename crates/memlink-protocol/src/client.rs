//! Request side of the UDP protocol.

use crate::error::{ProtocolError, Result};
use crate::instruction::{Instruction, MAX_DATAGRAM_SIZE};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Sends instructions to one peer and waits for matching responses.
pub struct InstructionClient {
    socket: UdpSocket,
    peer: SocketAddr,
    timeout: Duration,
}

impl InstructionClient {
    /// Bind an ephemeral loopback socket for talking to `peer`.
    pub async fn connect(peer: SocketAddr, timeout: Duration) -> Result<Self> {
        let local = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| ProtocolError::BindFailed {
                addr: local,
                source,
            })?;

        Ok(Self {
            socket,
            peer,
            timeout,
        })
    }

    /// Peer this client talks to
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Local address of the client socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send one instruction without waiting for an answer.
    pub async fn send(&self, instruction: &Instruction) -> Result<()> {
        let bytes = instruction.encode()?;
        self.socket.send_to(&bytes, self.peer).await?;
        Ok(())
    }

    /// Send a request and wait for the response of the same kind.
    ///
    /// Datagrams from other senders and non-matching instructions are
    /// ignored until the timeout runs out.
    pub async fn request(&self, instruction: &Instruction) -> Result<Instruction> {
        self.send(instruction).await?;

        let expected = instruction.code();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let wait = async {
            loop {
                let (len, from) = self.socket.recv_from(&mut buf).await?;
                if from != self.peer {
                    tracing::debug!("Ignoring datagram from unexpected sender {from}");
                    continue;
                }
                match Instruction::decode(&buf[..len]) {
                    Ok(reply) if reply.is_response() && reply.code() == expected => {
                        return Ok::<_, ProtocolError>(reply);
                    }
                    Ok(other) => {
                        tracing::debug!("Ignoring {} while waiting", other.code().name());
                    }
                    Err(e) => tracing::warn!("Dropping reply from {from}: {e}"),
                }
            }
        };

        tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| ProtocolError::Timeout {
                peer: self.peer,
                millis: self.timeout.as_millis() as u64,
            })?
    }

    /// PING the peer; `Ok(())` when a PING response arrives in time.
    pub async fn ping(&self) -> Result<()> {
        self.request(&Instruction::Ping).await.map(|_| ())
    }
}
