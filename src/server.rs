//! A tiny rcon server for tests and local experiments.
//!
//! Every inbound packet is handed to a handler which returns the packets to
//! send back. [srcds_reply] gives a handler that behaves like a Source
//! dedicated server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{
    assembler::Assembler,
    error::RconError,
    packet::{Direction, Packet, PacketType},
};

type Handler = dyn Fn(Packet) -> Vec<Packet> + Send + Sync + 'static;

pub struct Server {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Server {
    /// Binds `addr` and starts answering connections with `handler`.
    pub async fn start<F>(addr: &str, handler: F) -> Result<Self, RconError>
    where
        F: Fn(Packet) -> Vec<Packet> + Send + Sync + 'static,
    {
        Self::start_chunked(addr, None, handler).await
    }

    /// Like [start](Server::start), but replies are written `chunk_size` bytes
    /// at a time so clients see packets split across reads.
    pub async fn with_chunk_size<F>(
        addr: &str,
        chunk_size: usize,
        handler: F,
    ) -> Result<Self, RconError>
    where
        F: Fn(Packet) -> Vec<Packet> + Send + Sync + 'static,
    {
        Self::start_chunked(addr, Some(chunk_size.max(1)), handler).await
    }

    async fn start_chunked<F>(
        addr: &str,
        chunk_size: Option<usize>,
        handler: F,
    ) -> Result<Self, RconError>
    where
        F: Fn(Packet) -> Vec<Packet> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(RconError::BindError)?;
        let local_addr = listener.local_addr().map_err(RconError::BindError)?;
        let handler: Arc<Handler> = Arc::new(handler);

        let handle: JoinHandle<()> = tokio::spawn(async move {
            info!("rcon server running on {}", local_addr);
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(err) = Server::process(stream, peer, handler, chunk_size).await {
                                debug!("connection from {} ended: {}", peer, err);
                            }
                        });
                    }
                    Err(e) => error!("{:?}", e),
                }
            }
        });

        Ok(Server { local_addr, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }

    async fn process(
        mut stream: TcpStream,
        peer: SocketAddr,
        handler: Arc<Handler>,
        chunk_size: Option<usize>,
    ) -> Result<(), RconError> {
        info!("accept from {:?}", peer);
        stream.set_nodelay(true).ok();

        let mut assembler = Assembler::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(RconError::ReceiveError)?;
            if n == 0 {
                return Ok(());
            }

            for raw in assembler.feed(&buf[..n])? {
                let packet = match Packet::unpack(&raw, Direction::Serverbound) {
                    Ok(packet) => packet,
                    Err(RconError::UnknownPacketType(code)) => {
                        warn!("ignoring packet with unknown type {}", code);
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                for reply in handler(packet) {
                    Server::write(&mut stream, &reply.pack(), chunk_size).await?;
                }
            }
        }
    }

    async fn write(
        stream: &mut TcpStream,
        bytes: &[u8],
        chunk_size: Option<usize>,
    ) -> Result<(), RconError> {
        let Some(chunk_size) = chunk_size else {
            return stream.write_all(bytes).await.map_err(RconError::SendError);
        };

        for chunk in bytes.chunks(chunk_size) {
            stream.write_all(chunk).await.map_err(RconError::SendError)?;
            stream.flush().await.map_err(RconError::SendError)?;
            // give the peer a chance to read the fragment on its own
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Answers `packet` the way srcds does: an auth request gets an empty
/// SERVERDATA_RESPONSE_VALUE followed by SERVERDATA_AUTH_RESPONSE (id `-1` if
/// the password is wrong), and commands get the output of `exec`.
pub fn srcds_reply<F>(password: &str, packet: Packet, exec: F) -> Vec<Packet>
where
    F: Fn(&str) -> String,
{
    match packet.packet_type() {
        PacketType::Auth => {
            let id = if packet.body() == password {
                packet.id()
            } else {
                -1
            };
            vec![
                Packet::new(packet.id(), PacketType::ResponseValue, ""),
                Packet::new(id, PacketType::AuthResponse, ""),
            ]
        }
        PacketType::Exec => vec![Packet::new(
            packet.id(),
            PacketType::ResponseValue,
            exec(packet.body()),
        )],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srcds_auth_reply_echoes_id_on_success() {
        let replies = srcds_reply("secret", Packet::new(4, PacketType::Auth, "secret"), |_| {
            String::new()
        });
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].packet_type(), PacketType::ResponseValue);
        assert_eq!(replies[1].id(), 4);
        assert_eq!(replies[1].packet_type(), PacketType::AuthResponse);
    }

    #[test]
    fn srcds_auth_reply_uses_sentinel_on_bad_password() {
        let replies = srcds_reply("secret", Packet::new(4, PacketType::Auth, "wrong"), |_| {
            String::new()
        });
        assert_eq!(replies[1].id(), -1);
    }

    #[test]
    fn srcds_exec_reply_runs_command() {
        let replies = srcds_reply("secret", Packet::new(9, PacketType::Exec, "echo hi"), |cmd| {
            cmd.trim_start_matches("echo ").to_string()
        });
        assert_eq!(replies, vec![Packet::new(9, PacketType::ResponseValue, "hi")]);
    }
}
