use crate::error::RconError;

/// Size of the length prefix that precedes every packet on the wire.
pub const SIZE_FIELD_LEN: usize = 4;

/// Smallest value the length prefix can hold: id, type and both terminators.
pub const MIN_PACKET_SIZE: i32 = 10;

/// Largest value of the length prefix we are willing to buffer. Real servers
/// stay far below this; anything bigger means the stream lost alignment.
pub const MAX_PACKET_SIZE: i32 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    // SERVERDATA_AUTH
    Auth,
    // SERVERDATA_EXECCOMMAND
    Exec,
    // SERVERDATA_AUTH_RESPONSE
    AuthResponse,
    // SERVERDATA_RESPONSE_VALUE
    ResponseValue,
}

/// Which way a packet travels. The protocol reuses type code `2` for
/// SERVERDATA_EXECCOMMAND (client to server) and SERVERDATA_AUTH_RESPONSE
/// (server to client), so decoding needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Serverbound,
    Clientbound,
}

impl PacketType {
    pub fn code(&self) -> i32 {
        match self {
            PacketType::Auth => 3,
            PacketType::Exec => 2,
            PacketType::AuthResponse => 2,
            PacketType::ResponseValue => 0,
        }
    }

    pub fn to_le_bytes(&self) -> [u8; 4] {
        self.code().to_le_bytes()
    }

    pub fn from_code(code: i32, direction: Direction) -> Result<Self, RconError> {
        match (code, direction) {
            (3, _) => Ok(PacketType::Auth),
            (2, Direction::Serverbound) => Ok(PacketType::Exec),
            (2, Direction::Clientbound) => Ok(PacketType::AuthResponse),
            (0, _) => Ok(PacketType::ResponseValue),
            _ => Err(RconError::UnknownPacketType(code)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: i32,
    packet_type: PacketType,
    body: String,
}

impl Packet {
    pub fn new(id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        Packet {
            id,
            packet_type,
            body: body.into(),
        }
    }

    // Since the only one of these values that can change in length is the body,
    // an easy way to calculate the size of a packet is to find the byte-length
    // of the packet body, then add 10 to it.
    pub fn size(&self) -> i32 {
        self.body.len() as i32 + MIN_PACKET_SIZE
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn body(&self) -> &str {
        self.body.as_ref()
    }

    pub fn into_body(self) -> String {
        self.body
    }

    pub fn pack(&self) -> Vec<u8> {
        // Size, ID, Type, Body, Terminator
        let mut payload = Vec::<u8>::with_capacity(SIZE_FIELD_LEN + self.size() as usize);
        payload.extend_from_slice(&self.size().to_le_bytes());
        payload.extend_from_slice(&self.id.to_le_bytes());
        payload.extend_from_slice(&self.packet_type.to_le_bytes());
        payload.extend_from_slice(self.body.as_bytes());
        // null terminate the body, then the always-empty second string
        payload.extend_from_slice(&[0u8, 0u8]);
        payload
    }

    /// Decodes one complete packet, size prefix included. Bytes past the
    /// declared size are ignored.
    pub fn unpack(buf: &[u8], direction: Direction) -> Result<Self, RconError> {
        let size = read_i32(buf, 0).ok_or(RconError::MalformedPacket("missing size prefix"))?;
        if size < MIN_PACKET_SIZE {
            return Err(RconError::MalformedPacket("declared size below minimum"));
        }

        let end = SIZE_FIELD_LEN + size as usize;
        if buf.len() < end {
            return Err(RconError::MalformedPacket("buffer shorter than declared size"));
        }
        if buf[end - 2..end] != [0, 0] {
            return Err(RconError::MalformedPacket("missing null terminators"));
        }

        let id = read_i32(buf, 4).ok_or(RconError::MalformedPacket("missing id"))?;
        let code = read_i32(buf, 8).ok_or(RconError::MalformedPacket("missing type"))?;
        let packet_type = PacketType::from_code(code, direction)?;
        let body = String::from_utf8_lossy(&buf[12..end - 2]).into_owned();

        Ok(Packet {
            id,
            packet_type,
            body,
        })
    }
}

/// Checks that `body` can be sent as-is: the wire format ends a body at its
/// first NUL, and the whole packet has to fit under [MAX_PACKET_SIZE].
pub fn check_body(body: &str) -> Result<(), RconError> {
    if body.contains('\0') {
        return Err(RconError::InvalidBody("body contains a NUL byte"));
    }
    if body.len() > (MAX_PACKET_SIZE - MIN_PACKET_SIZE) as usize {
        return Err(RconError::InvalidBody("body exceeds the maximum packet size"));
    }
    Ok(())
}

/// Reads the size prefix at the start of `buf`, if there are enough bytes.
pub fn peek_size(buf: &[u8]) -> Option<i32> {
    read_i32(buf, 0)
}

fn read_i32(buf: &[u8], offset: usize) -> Option<i32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(i32::from_le_bytes(bytes.try_into().ok()?))
}
