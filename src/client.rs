use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::{
    assembler::Assembler,
    error::RconError,
    packet::{check_body, Direction, Packet, PacketType},
    registry::{Registry, Resolution},
};

/// Id some servers use for the notification that follows an auth request.
pub const SENTINEL_ID: i32 = -1;

/// Default read buffer size (4 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

const MESSAGE_CHANNEL_CAPACITY: usize = 32;

/// Connection settings for a [Client].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server, resolved on connect.
    pub addr: String,
    /// Time allowed for the TCP connection to open.
    pub connect_timeout: Duration,
    /// Deadline for each request, the auth handshake included.
    pub request_timeout: Duration,
    /// Size of the buffer handed to each socket read.
    pub read_buffer_size: usize,
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// Lifecycle of a session as seen from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for the auth handshake.
    Authenticating,
    /// Authenticated, nothing in flight.
    Ready,
    /// Authenticated, at least one command awaiting its reply.
    Querying,
    Disconnecting,
    Disconnected,
}

/// Simple asynchronous rcon client. Call `connect()` to establish a connection
/// and authenticate.
///
/// The socket is owned by a background task; the client only sends it
/// requests, so `command()` takes `&self` and several commands can be in
/// flight at once. Replies are matched by id, not by arrival order.
///
/// ## Example
/// ```no_run
/// use rcon_exporter::client::Client;
/// use std::error::Error;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let client = Client::connect("dev.viora.sh", 27016, "<put rcon password here>", Duration::from_secs(5)).await?;
///     let response = client.command("echo hi").await?;
///
///     assert_eq!(response, "hi");
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct Client {
    next_packet_id: AtomicI32,
    in_flight: AtomicUsize,
    request_timeout: Duration,
    messages: mpsc::Sender<Message>,
    state: watch::Receiver<SessionState>,
    worker: JoinHandle<()>,
}

/// Requests from the client to the worker that owns the socket.
enum Message {
    /// Register `packet`'s id, then write the packet.
    Send {
        packet: Packet,
        deadline: Instant,
        reply: oneshot::Sender<Result<oneshot::Receiver<Resolution>, RconError>>,
    },
    /// Register an id without writing anything.
    Watch {
        id: i32,
        deadline: Instant,
        reply: oneshot::Sender<Result<oneshot::Receiver<Resolution>, RconError>>,
    },
    Forget {
        id: i32,
    },
    Authenticated {
        done: oneshot::Sender<()>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

impl Client {
    /// Opens a connection to `host:port` and authenticates with `password`.
    /// `timeout` applies both to opening the connection and to every request.
    pub async fn connect(
        host: &str,
        port: u16,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, RconError> {
        let config = ClientConfig::new(format!("{}:{}", host, port))
            .with_connect_timeout(timeout)
            .with_request_timeout(timeout);
        Self::connect_with(config, password).await
    }

    pub async fn connect_with(config: ClientConfig, password: &str) -> Result<Self, RconError> {
        trace!("connecting to {}", config.addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.addr))
            .await
            .map_err(|_| {
                RconError::UnreachableHost(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })?
            .map_err(RconError::UnreachableHost)?;
        stream.set_nodelay(true).ok();

        trace!("opened tcp stream to {}, attempting auth", config.addr);

        let (messages, state, worker) = Worker::spawn(stream, config.read_buffer_size);

        let client = Client {
            next_packet_id: AtomicI32::new(0),
            in_flight: AtomicUsize::new(0),
            request_timeout: config.request_timeout,
            messages,
            state,
            worker,
        };

        // on failure the client is dropped here, which stops the worker and
        // closes the socket
        client.auth(password).await?;
        trace!("auth complete");

        Ok(client)
    }

    /// Run a rcon command and wait for its reply.
    pub async fn command(&self, command: &str) -> Result<String, RconError> {
        check_body(command)?;
        let packet = self.create_packet(PacketType::Exec, command);
        let id = packet.id();
        trace!("sending command {} as request {}", command, id);

        let _in_flight = InFlight::enter(&self.in_flight);
        let response = flatten(self.send(packet).await?.await)?;
        if response.packet_type() != PacketType::ResponseValue {
            return Err(RconError::UnexpectedPacket {
                id,
                got: response.packet_type(),
                expected: PacketType::ResponseValue,
            });
        }

        Ok(response.into_body())
    }

    /// Closes the connection. Requests still pending fail with
    /// [RconError::ConnectionClosed].
    pub async fn disconnect(self) {
        let (done, finished) = oneshot::channel();
        if self.messages.send(Message::Shutdown { done }).await.is_ok() {
            let _ = finished.await;
        }
        let _ = self.worker.await;
    }

    pub fn state(&self) -> SessionState {
        let state = *self.state.borrow();
        if state == SessionState::Ready && self.in_flight.load(Ordering::SeqCst) > 0 {
            SessionState::Querying
        } else {
            state
        }
    }

    /// Resolves once the session reached [SessionState::Disconnected].
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == SessionState::Disconnected)
            .await;
    }

    /// Sends the auth packet and waits for either a reply to it or a packet
    /// with the sentinel id, whichever comes first.
    ///
    /// Some servers never answer with a proper SERVERDATA_AUTH_RESPONSE (CS:GO
    /// accepts a wrong password and then silently ignores commands), so the
    /// reply is not checked any further.
    async fn auth(&self, password: &str) -> Result<(), RconError> {
        check_body(password)?;
        let auth_packet = self.create_packet(PacketType::Auth, password);
        let auth_id = auth_packet.id();
        let deadline = Instant::now() + self.request_timeout;

        let sentinel = self
            .call(|reply| Message::Watch {
                id: SENTINEL_ID,
                deadline,
                reply,
            })
            .await?;
        trace!("sending auth packet to server");
        let direct = self
            .call(|reply| Message::Send {
                packet: auth_packet,
                deadline,
                reply,
            })
            .await?;

        let (response, loser) = tokio::select! {
            response = direct => (response, SENTINEL_ID),
            response = sentinel => (response, auth_id),
        };
        let response = flatten(response)?;
        debug!(
            "auth answered by {:?} packet with id {}",
            response.packet_type(),
            response.id()
        );

        let _ = self.messages.send(Message::Forget { id: loser }).await;
        let (done, marked) = oneshot::channel();
        self.messages
            .send(Message::Authenticated { done })
            .await
            .map_err(|_| RconError::ConnectionClosed)?;
        marked.await.map_err(|_| RconError::ConnectionClosed)
    }

    /// Hands `packet` to the worker and returns the slot its reply lands in.
    async fn send(&self, packet: Packet) -> Result<oneshot::Receiver<Resolution>, RconError> {
        let deadline = Instant::now() + self.request_timeout;
        self.call(|reply| Message::Send {
            packet,
            deadline,
            reply,
        })
        .await
    }

    async fn call<F>(&self, message: F) -> Result<oneshot::Receiver<Resolution>, RconError>
    where
        F: FnOnce(oneshot::Sender<Result<oneshot::Receiver<Resolution>, RconError>>) -> Message,
    {
        let (reply, registered) = oneshot::channel();
        self.messages
            .send(message(reply))
            .await
            .map_err(|_| RconError::ConnectionClosed)?;
        registered.await.map_err(|_| RconError::ConnectionClosed)?
    }

    fn create_packet(&self, packet_type: PacketType, body: &str) -> Packet {
        Packet::new(self.next_id(), packet_type, body)
    }

    /// Ids count up from 0 and stay non-negative so they never collide with
    /// [SENTINEL_ID].
    fn next_id(&self) -> i32 {
        self.next_packet_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(id.checked_add(1).unwrap_or(0))
            })
            .unwrap_or_default()
    }
}

/// Counts a command as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn flatten(received: Result<Resolution, oneshot::error::RecvError>) -> Result<Packet, RconError> {
    received.map_err(|_| RconError::ConnectionClosed)?
}

/// Owns the read half, the assembler and the registry of one session. Inbound
/// bytes and client requests are handled on this single task, so none of
/// that state needs a lock.
struct Worker {
    reader: OwnedReadHalf,
    outbound: Outbound,
    inbox: mpsc::Receiver<Message>,
    state: watch::Sender<SessionState>,
    assembler: Assembler,
    registry: Registry,
    read_buffer_size: usize,
}

/// Writes packets in the order they were queued, on a task of its own. A
/// peer that stops reading only stalls this task; replies and deadlines are
/// still handled by the [Worker].
struct Outbound {
    queue: mpsc::UnboundedSender<Vec<u8>>,
    failed: oneshot::Receiver<RconError>,
    task: JoinHandle<()>,
}

impl Outbound {
    fn spawn(mut writer: OwnedWriteHalf) -> Self {
        let (queue, mut outbox) = mpsc::unbounded_channel::<Vec<u8>>();
        let (report, failed) = oneshot::channel();

        let task = tokio::spawn(async move {
            while let Some(bytes) = outbox.recv().await {
                if let Err(err) = writer.write_all(&bytes).await {
                    let _ = report.send(RconError::SendError(err));
                    return;
                }
            }
            let _ = writer.shutdown().await;
        });

        Outbound {
            queue,
            failed,
            task,
        }
    }
}

impl Worker {
    fn spawn(
        stream: TcpStream,
        read_buffer_size: usize,
    ) -> (
        mpsc::Sender<Message>,
        watch::Receiver<SessionState>,
        JoinHandle<()>,
    ) {
        let (reader, writer) = stream.into_split();
        let (messages, inbox) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (state_tx, state) = watch::channel(SessionState::Authenticating);

        let worker = Worker {
            reader,
            outbound: Outbound::spawn(writer),
            inbox,
            state: state_tx,
            assembler: Assembler::new(),
            registry: Registry::new(),
            read_buffer_size,
        };
        (messages, state, tokio::spawn(worker.run()))
    }

    async fn run(mut self) {
        let mut buf = vec![0u8; self.read_buffer_size];

        let reason = loop {
            let deadline = self.registry.next_deadline();

            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(Message::Send { packet, deadline, reply }) => {
                        if let Err(err) = self.send(packet, deadline, reply) {
                            break err;
                        }
                    }
                    Some(Message::Watch { id, deadline, reply }) => {
                        let _ = reply.send(self.registry.register(id, deadline));
                    }
                    Some(Message::Forget { id }) => {
                        self.registry.forget(id);
                    }
                    Some(Message::Authenticated { done }) => {
                        self.state.send_replace(SessionState::Ready);
                        let _ = done.send(());
                    }
                    Some(Message::Shutdown { done }) => {
                        self.state.send_replace(SessionState::Disconnecting);
                        self.close(RconError::ConnectionClosed);
                        let _ = done.send(());
                        return;
                    }
                    // client dropped without calling disconnect()
                    None => break RconError::ConnectionClosed,
                },
                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => break RconError::ConnectionClosed,
                    Ok(n) => {
                        trace!("received {} bytes", n);
                        if let Err(err) = self.receive(&buf[..n]) {
                            break err;
                        }
                    }
                    Err(err) => break RconError::ReceiveError(err),
                },
                failed = &mut self.outbound.failed => {
                    break failed.unwrap_or(RconError::ConnectionClosed);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.registry.expire_due(Instant::now());
                }
            }
        };

        debug!("session closed: {}", reason);
        self.close(reason);
    }

    fn send(
        &mut self,
        packet: Packet,
        deadline: Instant,
        reply: oneshot::Sender<Result<oneshot::Receiver<Resolution>, RconError>>,
    ) -> Result<(), RconError> {
        let id = packet.id();
        match self.registry.register(id, deadline) {
            Ok(receiver) => {
                let _ = reply.send(Ok(receiver));
            }
            Err(err) => {
                let _ = reply.send(Err(err));
                return Ok(());
            }
        }

        trace!("queueing packet {} ({} bytes)", id, packet.size());
        self.outbound
            .queue
            .send(packet.pack())
            .map_err(|_| RconError::ConnectionClosed)
    }

    fn receive(&mut self, chunk: &[u8]) -> Result<(), RconError> {
        for buf in self.assembler.feed(chunk)? {
            match Packet::unpack(&buf, Direction::Clientbound) {
                Ok(packet) => {
                    trace!("receive response for packet id {}", packet.id());
                    self.registry.resolve(packet);
                }
                // framing was fine, so the stream is still aligned
                Err(RconError::UnknownPacketType(code)) => {
                    warn!("discarding packet with unknown type {}", code);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Fails whatever is still pending and marks the session as gone. The
    /// first error is reported to the pending requests; transport errors can't
    /// be cloned, so they are all reported as a closed connection.
    fn close(&mut self, reason: RconError) {
        let failed = match reason {
            RconError::MalformedPacket(why) => self
                .registry
                .fail_all(|| RconError::MalformedPacket(why)),
            _ => self.registry.fail_all(|| RconError::ConnectionClosed),
        };
        if failed > 0 {
            debug!("failed {} pending requests", failed);
        }
        // dropping the write half with the task also shuts it down
        self.outbound.task.abort();
        self.assembler.reset();
        self.state.send_replace(SessionState::Disconnected);
    }
}
