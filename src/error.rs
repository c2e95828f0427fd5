use thiserror::Error;

use crate::packet::PacketType;

/// Possible errors for the rcon layer.
#[derive(Error, Debug)]
pub enum RconError {
    /// Returned if the framing of a packet is broken (bad size prefix,
    /// missing terminators, truncated buffer). The stream is most likely out
    /// of alignment afterwards, so the session is closed.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
    /// Returned if we received a packet that does not have a type known to us.
    #[error("unknown rcon packet type: {0}")]
    UnknownPacketType(i32),
    /// Returned if a well-formed packet of the wrong type answered a request.
    #[error("unexpected {got:?} packet for request {id}, expected {expected:?}")]
    UnexpectedPacket {
        id: i32,
        got: PacketType,
        expected: PacketType,
    },
    /// A request body that cannot be put on the wire, rejected before
    /// anything is sent.
    #[error("invalid request body: {0}")]
    InvalidBody(&'static str),
    /// Returned if the server did not respond in time.
    #[error("timeout")]
    Timeout,
    /// Returned if you can't remember the password. Most servers never say so
    /// explicitly, so this is rarely seen.
    #[error("bad password")]
    AuthenticationError,
    /// Returned if the host is down, behind a firewall or cannot be resolved.
    #[error("host cannot be reached")]
    UnreachableHost(#[source] std::io::Error),
    /// The stream was established, but writing to the socket failed.
    #[error("cannot send message to host")]
    SendError(#[source] std::io::Error),
    /// The stream was established, but reading from the socket failed.
    #[error("cannot receive response from host")]
    ReceiveError(#[source] std::io::Error),
    /// The connection was closed by either side while requests were pending.
    #[error("connection closed")]
    ConnectionClosed,
    /// A request id was registered twice while still in flight.
    #[error("request id {0} is already pending")]
    DuplicateRequestId(i32),
    /// The scripted server could not bind its listener.
    #[error("cannot bind listener")]
    BindError(#[source] std::io::Error),
}

impl RconError {
    /// Socket-level failures. The session is gone after any of these.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RconError::UnreachableHost(_)
                | RconError::SendError(_)
                | RconError::ReceiveError(_)
                | RconError::ConnectionClosed
        )
    }

    /// Errors after which the session cannot be used anymore.
    pub fn is_fatal(&self) -> bool {
        self.is_transport() || matches!(self, RconError::MalformedPacket(_))
    }
}

/// Returned when the plain-text reply of a game server cannot be understood.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown game: {0}")]
    UnknownGame(String),
    #[error("`{0}` line missing from status output")]
    MissingField(&'static str),
    #[error("stats output has no data row")]
    MissingStats,
    #[error("stats output has {got} columns, expected at least {expected}")]
    ShortStats { got: usize, expected: usize },
    #[error("stats column `{column}` is not a number: {value}")]
    InvalidNumber { column: &'static str, value: String },
}

/// Returned when a `/metrics` request does not name a server to poll.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryError {
    #[error("missing query parameter `{0}`")]
    Missing(&'static str),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid game provided: {0}, available games: csgo, css, tf2, gmod, hl2, l4d2")]
    UnknownGame(String),
}

/// Errors of a full poll cycle: talking to the server, reading its reply and
/// building the metrics out of it.
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error(transparent)]
    Rcon(#[from] RconError),
    #[error("cannot parse server output")]
    Parse(#[from] ParseError),
    #[error("cannot build metrics")]
    Metrics(#[from] prometheus::Error),
    /// The HTTP listener could not be bound.
    #[error("cannot listen on {addr}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
