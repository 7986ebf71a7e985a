mod error;

pub use self::error::CodecError;

/// Size of the fixed frame header:
/// length (4) + kind (1) + flags (1) + message id (8) + iv (16) + hmac (32).
pub const HEADER_SIZE: usize = 62;

/// Upper bound on a single frame, header included. Bounds how much a peer
/// can make us buffer before the frame is decoded.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const KIND_IDENTITY_REQUEST: u8 = 1;
const KIND_IDENTITY: u8 = 2;
const KIND_LEADER_ACTIVE: u8 = 3;
const KIND_LEADER_ACTIVE_ACK: u8 = 4;

/// Leader heartbeat, broadcast to every connected peer.
///
/// `next == 0` is a plain heartbeat; `next > 0` proposes round `next`
/// carrying `next_content` as the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderActive {
    pub id: u64,
    pub seq: u64,
    pub round: u64,
    pub next: u64,
    pub next_content: Vec<u8>,
}

/// Unicast reply to a `LeaderActive` heartbeat, addressed to its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderActiveAck {
    pub id: u64,
    pub seq: u64,
    pub round: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Sent by a freshly connected node to ask the peer for its id.
    IdentityRequest,
    /// Response to `IdentityRequest`; binds the connection to a peer id.
    Identity { id: u64 },
    LeaderActive(LeaderActive),
    LeaderActiveAck(LeaderActiveAck),
}

impl Message {
    pub fn kind(&self) -> u8 {
        match self {
            Message::IdentityRequest => KIND_IDENTITY_REQUEST,
            Message::Identity { .. } => KIND_IDENTITY,
            Message::LeaderActive(_) => KIND_LEADER_ACTIVE,
            Message::LeaderActiveAck(_) => KIND_LEADER_ACTIVE_ACK,
        }
    }

    fn body_size(&self) -> usize {
        match self {
            Message::IdentityRequest => 0,
            Message::Identity { .. } => 8,
            Message::LeaderActive(m) => 8 + 8 + 8 + 8 + 4 + m.next_content.len(),
            Message::LeaderActiveAck(_) => 8 + 8 + 8,
        }
    }

    /// Total frame size `pack` would produce, header included.
    pub fn packed_size(&self) -> usize {
        HEADER_SIZE + self.body_size()
    }

    /// Encode the message into a complete frame.
    ///
    /// The iv and hmac header fields are reserved and written as zeros.
    pub fn pack(&self, message_id: u64) -> Vec<u8> {
        let length = self.packed_size();
        let mut buf = Vec::with_capacity(length);
        buf.extend_from_slice(&(length as u32).to_be_bytes());
        buf.push(self.kind());
        buf.push(0); // flags
        buf.extend_from_slice(&message_id.to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]); // iv, reserved
        buf.extend_from_slice(&[0u8; 32]); // hmac, reserved

        match self {
            Message::IdentityRequest => {}
            Message::Identity { id } => {
                buf.extend_from_slice(&id.to_be_bytes());
            }
            Message::LeaderActive(m) => {
                buf.extend_from_slice(&m.id.to_be_bytes());
                buf.extend_from_slice(&m.seq.to_be_bytes());
                buf.extend_from_slice(&m.round.to_be_bytes());
                buf.extend_from_slice(&m.next.to_be_bytes());
                buf.extend_from_slice(&(m.next_content.len() as u32).to_be_bytes());
                buf.extend_from_slice(&m.next_content);
            }
            Message::LeaderActiveAck(m) => {
                buf.extend_from_slice(&m.id.to_be_bytes());
                buf.extend_from_slice(&m.seq.to_be_bytes());
                buf.extend_from_slice(&m.round.to_be_bytes());
            }
        }

        buf
    }
}

/// Read the total frame length from the first four bytes of `src`.
pub fn decode_message_length(src: &[u8]) -> Result<usize, CodecError> {
    if src.len() < 4 {
        return Err(CodecError::Truncated {
            need: 4,
            have: src.len(),
        });
    }
    let length = get_u32(src, 0);
    if (length as usize) < HEADER_SIZE {
        return Err(CodecError::LengthTooSmall(length));
    }
    if length as usize > MAX_FRAME_SIZE {
        return Err(CodecError::LengthTooLarge(length));
    }
    Ok(length as usize)
}

/// Decode one complete frame from the front of `src`.
pub fn decode_message(src: &[u8]) -> Result<Message, CodecError> {
    let length = decode_message_length(src)?;
    if src.len() < length {
        return Err(CodecError::Truncated {
            need: length,
            have: src.len(),
        });
    }

    let kind = src[4];
    // flags (src[5]), message id (src[6..14]), iv and hmac are not
    // interpreted; iv/hmac are reserved for an authentication layer that
    // is not wired up.
    let body = &src[HEADER_SIZE..length];

    match kind {
        KIND_IDENTITY_REQUEST => Ok(Message::IdentityRequest),
        KIND_IDENTITY => {
            if body.len() < 8 {
                return Err(CodecError::MalformedBody);
            }
            Ok(Message::Identity {
                id: get_u64(body, 0),
            })
        }
        KIND_LEADER_ACTIVE => {
            if body.len() < 36 {
                return Err(CodecError::MalformedBody);
            }
            let next_len = get_u32(body, 32) as usize;
            if body.len() < 36 + next_len {
                return Err(CodecError::MalformedBody);
            }
            Ok(Message::LeaderActive(LeaderActive {
                id: get_u64(body, 0),
                seq: get_u64(body, 8),
                round: get_u64(body, 16),
                next: get_u64(body, 24),
                next_content: body[36..36 + next_len].to_vec(),
            }))
        }
        KIND_LEADER_ACTIVE_ACK => {
            if body.len() < 24 {
                return Err(CodecError::MalformedBody);
            }
            Ok(Message::LeaderActiveAck(LeaderActiveAck {
                id: get_u64(body, 0),
                seq: get_u64(body, 8),
                round: get_u64(body, 16),
            }))
        }
        other => Err(CodecError::UnknownKind(other)),
    }
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(raw)
}

fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(raw)
}
