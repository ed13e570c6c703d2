//! In-process MQTT 3.1.1 endpoint for tests.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// How the fake broker answers requests after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behaviour {
    /// Grant every subscription and acknowledge every publish.
    Ack,
    /// Answer every SUBSCRIBE with return code 0x80.
    RejectSubscribe,
    /// Never send PUBACK.
    WithholdPubAck,
    /// Close the socket on the first PUBLISH without acknowledging it.
    DropOnPublish,
}

/// A broker that acknowledges everything.
pub(crate) async fn fake_broker() -> (u16, Arc<Notify>) {
    fake_broker_with(Behaviour::Ack).await
}

/// Answers CONNECT with an accepting CONNACK, then serves requests per
/// `behaviour` until the peer leaves or the returned `Notify` fires (which
/// drops every open socket).
pub(crate) async fn fake_broker_with(behaviour: Behaviour) -> (u16, Arc<Notify>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let kill = Arc::new(Notify::new());
    let kill_all = kill.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let kill = kill_all.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = serve(socket, behaviour) => {}
                    _ = kill.notified() => {}
                }
            });
        }
    });
    (port, kill)
}

async fn read_packet(socket: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = socket.read_u8().await?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = socket.read_u8().await?;
        len |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    socket.read_exact(&mut body).await?;
    Ok((header, body))
}

fn pkid_at(body: &[u8], at: usize) -> [u8; 2] {
    [body[at], body[at + 1]]
}

async fn serve(mut socket: TcpStream, behaviour: Behaviour) -> std::io::Result<()> {
    loop {
        let (header, body) = read_packet(&mut socket).await?;
        match header >> 4 {
            // CONNECT
            1 => socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await?,
            // PUBLISH
            3 => {
                let qos = (header >> 1) & 0x03;
                if behaviour == Behaviour::DropOnPublish {
                    return Ok(());
                }
                if qos > 0 && behaviour != Behaviour::WithholdPubAck {
                    let topic_len = usize::from(body[0]) << 8 | usize::from(body[1]);
                    let [hi, lo] = pkid_at(&body, 2 + topic_len);
                    socket.write_all(&[0x40, 0x02, hi, lo]).await?;
                }
            }
            // SUBSCRIBE
            8 => {
                let [hi, lo] = pkid_at(&body, 0);
                let code = if behaviour == Behaviour::RejectSubscribe {
                    0x80
                } else {
                    0x01
                };
                socket.write_all(&[0x90, 0x03, hi, lo, code]).await?;
            }
            // UNSUBSCRIBE
            10 => {
                let [hi, lo] = pkid_at(&body, 0);
                socket.write_all(&[0xb0, 0x02, hi, lo]).await?;
            }
            // PINGREQ
            12 => socket.write_all(&[0xd0, 0x00]).await?,
            // DISCONNECT
            14 => return Ok(()),
            _ => {}
        }
    }
}
