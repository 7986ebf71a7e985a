use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::message::{self, Message};

use super::registry::PeerRegistry;
use super::NetworkError;

/// Inbound protocol message, tagged with the sender id established during
/// the identity handshake.
#[derive(Debug)]
pub struct Inbound {
    pub from: u64,
    pub message: Message,
}

/// Drive one TCP connection, inbound or outbound: exchange identities,
/// register the peer, then pump frames until the connection dies.
///
/// Undecodable frames are dropped here and never reach the protocol
/// engine; protocol messages from a peer that has not identified itself,
/// or whose messages claim a different id than it identified with, are
/// dropped as well.
pub async fn run_connection(
    stream: TcpStream,
    local_id: u64,
    registry: PeerRegistry,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> Result<(), NetworkError> {
    let peer_addr = stream.peer_addr()?;
    let (mut reader, mut writer) = stream.into_split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    // Ask the peer who it is; it will ask us the same.
    let _ = outbound_tx.send(registry.pack(&Message::IdentityRequest));

    let mut peer_id: Option<u64> = None;
    let result = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(NetworkError::ConnectionClosed) => break Ok(()),
            Err(err) => break Err(err),
        };
        let msg = match message::decode_message(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("dropping undecodable frame from {peer_addr}: {err}");
                continue;
            }
        };

        match msg {
            Message::IdentityRequest => {
                let _ = outbound_tx.send(registry.pack(&Message::Identity { id: local_id }));
            }
            Message::Identity { id } => {
                if id == 0 || id == local_id {
                    warn!("peer {peer_addr} identified with invalid id {id}, dropping connection");
                    break Ok(());
                }
                if peer_id.is_none() {
                    debug!("peer {peer_addr} identified as node {id}");
                    peer_id = Some(id);
                    registry.register(id, outbound_tx.clone());
                }
            }
            other => {
                let Some(from) = peer_id else {
                    debug!("dropping message from unidentified peer {peer_addr}");
                    continue;
                };
                let claimed = match &other {
                    Message::LeaderActive(m) => m.id,
                    Message::LeaderActiveAck(m) => m.id,
                    Message::IdentityRequest | Message::Identity { .. } => from,
                };
                if claimed != from {
                    warn!("peer {from} sent a message claiming id {claimed}, dropping it");
                    continue;
                }
                if inbound.send(Inbound { from, message: other }).is_err() {
                    // Node loop is gone; nothing left to deliver to.
                    break Ok(());
                }
            }
        }
    };

    if let Some(id) = peer_id {
        registry.deregister(id, &outbound_tx);
        debug!("peer {id} at {peer_addr} disconnected");
    }
    write_task.abort();
    result
}

/// Read one length-prefixed frame.
async fn read_frame<S>(reader: &mut S) -> Result<Vec<u8>, NetworkError>
where
    S: AsyncRead + Unpin,
{
    let mut length_prefix = [0u8; 4];
    if let Err(err) = reader.read_exact(&mut length_prefix).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(NetworkError::ConnectionClosed);
        }
        return Err(err.into());
    }

    let length = message::decode_message_length(&length_prefix)?;
    let mut frame = vec![0u8; length];
    frame[..4].copy_from_slice(&length_prefix);
    if let Err(err) = reader.read_exact(&mut frame[4..]).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(NetworkError::ConnectionClosed);
        }
        return Err(err.into());
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{LeaderActiveAck, MAX_FRAME_SIZE};

    #[tokio::test]
    async fn read_frame_reassembles_a_packed_message() {
        let msg = Message::LeaderActiveAck(LeaderActiveAck {
            id: 2,
            seq: 9,
            round: 4,
        });
        let frame = msg.pack(1);

        let mut cursor = std::io::Cursor::new(frame.clone());
        let read = read_frame(&mut cursor).await.expect("frame");
        assert_eq!(read, frame);
        assert_eq!(message::decode_message(&read).unwrap(), msg);
    }

    #[tokio::test]
    async fn read_frame_reports_closed_connection() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(NetworkError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn read_frame_rejects_oversized_length() {
        let prefix = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();
        let mut cursor = std::io::Cursor::new(prefix);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(NetworkError::Codec(_))
        ));
    }
}
