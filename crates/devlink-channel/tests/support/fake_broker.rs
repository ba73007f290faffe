//! A minimal single-connection MQTT 3.1.1 broker, just enough of the wire
//! protocol for `rumqttc`'s client to connect, subscribe, publish at QoS 1,
//! and receive publishes back (spec.md §0.4's "fake MQTT broker loop").
//!
//! Deliberately ignorant of everything devlink-specific: callers get raw
//! `(topic, payload)` pairs in and push raw `(topic, payload)` pairs out.

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

pub struct InboundPublish {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub struct FakeBroker {
    pub port: u16,
    pub outbound_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

impl FakeBroker {
    /// Bind an ephemeral port and start serving the first connection made
    /// to it. Returns the broker handle plus the receiver of whatever the
    /// connected client publishes.
    pub async fn start() -> (Self, mpsc::UnboundedReceiver<InboundPublish>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake broker");
        let port = listener.local_addr().expect("local_addr").port();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(listener, inbound_tx, outbound_rx));
        (Self { port, outbound_tx }, inbound_rx)
    }

    /// Publish `payload` on `topic` to the connected client, as the broker
    /// would relay a device's report.
    pub fn publish(&self, topic: impl Into<String>, payload: Vec<u8>) {
        let _ = self.outbound_tx.send((topic.into(), payload));
    }
}

async fn run(
    listener: TcpListener,
    inbound_tx: mpsc::UnboundedSender<InboundPublish>,
    mut outbound_rx: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
) {
    let Ok((mut stream, _)) = listener.accept().await else { return };

    // CONNECT -> CONNACK (session present = 0, return code = accepted).
    if read_packet(&mut stream).await.is_none() {
        return;
    }
    if stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.is_err() {
        return;
    }

    let mut next_packet_id: u16 = 1;
    loop {
        tokio::select! {
            packet = read_packet(&mut stream) => {
                let Some((first_byte, body)) = packet else { break };
                let kind = first_byte >> 4;
                let flags = first_byte & 0x0F;
                match kind {
                    0x8 => {
                        // SUBSCRIBE -> SUBACK, granting every filter at QoS 1.
                        if body.len() < 2 {
                            break;
                        }
                        let packet_id = u16::from_be_bytes([body[0], body[1]]);
                        let topic_count = count_subscribe_topics(&body[2..]);
                        let mut reply = vec![0x90];
                        reply.extend(encode_remaining_length(2 + topic_count));
                        reply.extend_from_slice(&packet_id.to_be_bytes());
                        reply.extend(std::iter::repeat_n(0x01u8, topic_count));
                        if stream.write_all(&reply).await.is_err() {
                            break;
                        }
                    },
                    0x3 => {
                        // PUBLISH -> PUBACK (if QoS 1) + hand off to the caller.
                        let Some((topic, packet_id, payload)) = parse_publish(flags, &body) else { break };
                        if let Some(id) = packet_id {
                            let ack = [0x40, 0x02, (id >> 8) as u8, id as u8];
                            if stream.write_all(&ack).await.is_err() {
                                break;
                            }
                        }
                        let _ = inbound_tx.send(InboundPublish { topic, payload });
                    },
                    0xC => {
                        if stream.write_all(&[0xD0, 0x00]).await.is_err() {
                            break;
                        }
                    },
                    0xE => break,
                    _ => {},
                }
            },
            received = outbound_rx.recv() => {
                let Some((topic, payload)) = received else { continue };
                let packet_id = next_packet_id;
                next_packet_id = next_packet_id.wrapping_add(1);
                if next_packet_id == 0 {
                    next_packet_id = 1;
                }
                if write_publish(&mut stream, &topic, packet_id, &payload).await.is_err() {
                    break;
                }
            },
        }
    }
}

async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut first = [0u8; 1];
    stream.read_exact(&mut first).await.ok()?;
    let remaining = read_remaining_length(stream).await?;
    let mut body = vec![0u8; remaining];
    if remaining > 0 {
        stream.read_exact(&mut body).await.ok()?;
    }
    Some((first[0], body))
}

async fn read_remaining_length(stream: &mut TcpStream) -> Option<usize> {
    let mut multiplier = 1usize;
    let mut value = 0usize;
    loop {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await.ok()?;
        value += (byte[0] & 0x7F) as usize * multiplier;
        if byte[0] & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
    }
    Some(value)
}

fn encode_remaining_length(mut len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out
}

fn count_subscribe_topics(mut body: &[u8]) -> usize {
    let mut count = 0;
    while body.len() >= 3 {
        let len = u16::from_be_bytes([body[0], body[1]]) as usize;
        if body.len() < 2 + len + 1 {
            break;
        }
        body = &body[2 + len + 1..];
        count += 1;
    }
    count
}

fn parse_publish(flags: u8, body: &[u8]) -> Option<(String, Option<u16>, Vec<u8>)> {
    if body.len() < 2 {
        return None;
    }
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    if body.len() < 2 + topic_len {
        return None;
    }
    let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).ok()?;
    let qos = (flags >> 1) & 0x3;
    let mut offset = 2 + topic_len;
    let packet_id = if qos > 0 {
        if body.len() < offset + 2 {
            return None;
        }
        let id = u16::from_be_bytes([body[offset], body[offset + 1]]);
        offset += 2;
        Some(id)
    } else {
        None
    };
    Some((topic, packet_id, body[offset..].to_vec()))
}

async fn write_publish(stream: &mut TcpStream, topic: &str, packet_id: u16, payload: &[u8]) -> std::io::Result<()> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(&packet_id.to_be_bytes());
    body.extend_from_slice(payload);

    let mut out = vec![0x32]; // PUBLISH, QoS 1, dup 0, retain 0
    out.extend(encode_remaining_length(body.len()));
    out.extend(body);
    stream.write_all(&out).await
}
