//! MQTT 3.1.1 packet parsing and serialization
//!
//! Implements the control packets the broker speaks: CONNECT/CONNACK,
//! PUBLISH and its QoS acknowledgments, SUBSCRIBE/SUBACK,
//! UNSUBSCRIBE/UNSUBACK, PINGREQ/PINGRESP and DISCONNECT.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("invalid protocol name: {0}")]
    InvalidProtocolName(String),

    #[error("invalid protocol level: {0}")]
    InvalidProtocolLevel(u8),

    #[error("invalid QoS level: {0}")]
    InvalidQoS(u8),

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("malformed packet")]
    MalformedPacket,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Last-will declaration carried by CONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// A decoded control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_id: String,
        clean_session: bool,
        keep_alive: u16,
        will: Option<LastWill>,
        username: Option<String>,
        password: Option<Vec<u8>>,
    },
    ConnAck {
        session_present: bool,
        code: u8,
    },
    Publish {
        dup: bool,
        qos: u8,
        retain: bool,
        topic: String,
        packet_id: Option<u16>,
        payload: Vec<u8>,
    },
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe {
        packet_id: u16,
        filters: Vec<(String, u8)>,
    },
    SubAck {
        packet_id: u16,
        /// Granted QoS per filter; 0x80 marks a rejected subscription
        codes: Vec<u8>,
    },
    Unsubscribe {
        packet_id: u16,
        filters: Vec<String>,
    },
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

/// Read one packet from the stream
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Packet> {
    let mut first = [0u8; 1];
    if reader.read(&mut first).await? == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    let remaining = read_remaining_length(reader).await?;
    if remaining > MAX_PACKET_SIZE {
        return Err(ProtocolError::PacketTooLarge(remaining));
    }
    let mut body = vec![0u8; remaining];
    reader.read_exact(&mut body).await?;
    Packet::parse(first[0], &body)
}

async fn read_remaining_length<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<usize> {
    let mut multiplier: usize = 1;
    let mut value: usize = 0;
    for _ in 0..4 {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await?;
        value += (byte[0] & 0x7F) as usize * multiplier;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }
    Err(ProtocolError::InvalidRemainingLength)
}

fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) {
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
}

/// Cursor over a packet body
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u8(&mut self) -> ProtocolResult<u8> {
        let byte = *self.buf.get(self.pos).ok_or(ProtocolError::MalformedPacket)?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> ProtocolResult<u16> {
        Ok(((self.u8()? as u16) << 8) | self.u8()? as u16)
    }

    fn bytes(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::MalformedPacket);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn length_prefixed(&mut self) -> ProtocolResult<&'a [u8]> {
        let len = self.u16()? as usize;
        self.bytes(len)
    }

    fn string(&mut self) -> ProtocolResult<String> {
        let bytes = self.length_prefixed()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

impl Packet {
    /// Parse a packet body given its fixed-header first byte
    pub fn parse(first: u8, body: &[u8]) -> ProtocolResult<Self> {
        let packet_type = first >> 4;
        let flags = first & 0x0F;
        let mut reader = Reader::new(body);
        match packet_type {
            1 => Self::parse_connect(&mut reader),
            2 => {
                let ack_flags = reader.u8()?;
                let code = reader.u8()?;
                Ok(Self::ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    code,
                })
            }
            3 => Self::parse_publish(flags, &mut reader),
            4 => Ok(Self::PubAck(reader.u16()?)),
            5 => Ok(Self::PubRec(reader.u16()?)),
            6 => Ok(Self::PubRel(reader.u16()?)),
            7 => Ok(Self::PubComp(reader.u16()?)),
            8 => {
                let packet_id = reader.u16()?;
                let mut filters = Vec::new();
                while reader.remaining() > 0 {
                    let filter = reader.string()?;
                    let qos = reader.u8()?;
                    if qos > 2 {
                        return Err(ProtocolError::InvalidQoS(qos));
                    }
                    filters.push((filter, qos));
                }
                if filters.is_empty() {
                    return Err(ProtocolError::MalformedPacket);
                }
                Ok(Self::Subscribe { packet_id, filters })
            }
            9 => {
                let packet_id = reader.u16()?;
                let codes = reader.rest().to_vec();
                Ok(Self::SubAck { packet_id, codes })
            }
            10 => {
                let packet_id = reader.u16()?;
                let mut filters = Vec::new();
                while reader.remaining() > 0 {
                    filters.push(reader.string()?);
                }
                Ok(Self::Unsubscribe { packet_id, filters })
            }
            11 => Ok(Self::UnsubAck(reader.u16()?)),
            12 => Ok(Self::PingReq),
            13 => Ok(Self::PingResp),
            14 => Ok(Self::Disconnect),
            other => Err(ProtocolError::InvalidPacketType(other)),
        }
    }

    fn parse_connect(reader: &mut Reader<'_>) -> ProtocolResult<Self> {
        let protocol = reader.string()?;
        if protocol != "MQTT" {
            return Err(ProtocolError::InvalidProtocolName(protocol));
        }
        let level = reader.u8()?;
        if level != 4 {
            return Err(ProtocolError::InvalidProtocolLevel(level));
        }
        let flags = reader.u8()?;
        let keep_alive = reader.u16()?;
        let client_id = reader.string()?;

        let will = if flags & 0x04 != 0 {
            let topic = reader.string()?;
            let payload = reader.length_prefixed()?.to_vec();
            Some(LastWill {
                topic,
                payload,
                qos: (flags >> 3) & 0x03,
                retain: flags & 0x20 != 0,
            })
        } else {
            None
        };
        let username = if flags & 0x80 != 0 {
            Some(reader.string()?)
        } else {
            None
        };
        let password = if flags & 0x40 != 0 {
            Some(reader.length_prefixed()?.to_vec())
        } else {
            None
        };

        Ok(Self::Connect {
            client_id,
            clean_session: flags & 0x02 != 0,
            keep_alive,
            will,
            username,
            password,
        })
    }

    fn parse_publish(flags: u8, reader: &mut Reader<'_>) -> ProtocolResult<Self> {
        let qos = (flags >> 1) & 0x03;
        if qos > 2 {
            return Err(ProtocolError::InvalidQoS(qos));
        }
        let topic = reader.string()?;
        let packet_id = if qos > 0 { Some(reader.u16()?) } else { None };
        Ok(Self::Publish {
            dup: flags & 0x08 != 0,
            qos,
            retain: flags & 0x01 != 0,
            topic,
            packet_id,
            payload: reader.rest().to_vec(),
        })
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let (first, body) = match self {
            Self::Connect {
                client_id,
                clean_session,
                keep_alive,
                will,
                username,
                password,
            } => {
                let mut body = Vec::new();
                push_string(&mut body, "MQTT");
                body.push(4);
                let mut flags = 0u8;
                if *clean_session {
                    flags |= 0x02;
                }
                if let Some(will) = will {
                    flags |= 0x04 | (will.qos << 3);
                    if will.retain {
                        flags |= 0x20;
                    }
                }
                if username.is_some() {
                    flags |= 0x80;
                }
                if password.is_some() {
                    flags |= 0x40;
                }
                body.push(flags);
                body.extend_from_slice(&keep_alive.to_be_bytes());
                push_string(&mut body, client_id);
                if let Some(will) = will {
                    push_string(&mut body, &will.topic);
                    body.extend_from_slice(&(will.payload.len() as u16).to_be_bytes());
                    body.extend_from_slice(&will.payload);
                }
                if let Some(username) = username {
                    push_string(&mut body, username);
                }
                if let Some(password) = password {
                    body.extend_from_slice(&(password.len() as u16).to_be_bytes());
                    body.extend_from_slice(password);
                }
                (0x10, body)
            }
            Self::ConnAck {
                session_present,
                code,
            } => (0x20, vec![u8::from(*session_present), *code]),
            Self::Publish {
                dup,
                qos,
                retain,
                topic,
                packet_id,
                payload,
            } => {
                let mut first = 0x30 | (qos << 1);
                if *dup {
                    first |= 0x08;
                }
                if *retain {
                    first |= 0x01;
                }
                let mut body = Vec::new();
                push_string(&mut body, topic);
                if *qos > 0 {
                    body.extend_from_slice(&packet_id.unwrap_or(1).to_be_bytes());
                }
                body.extend_from_slice(payload);
                (first, body)
            }
            Self::PubAck(id) => (0x40, id.to_be_bytes().to_vec()),
            Self::PubRec(id) => (0x50, id.to_be_bytes().to_vec()),
            Self::PubRel(id) => (0x62, id.to_be_bytes().to_vec()),
            Self::PubComp(id) => (0x70, id.to_be_bytes().to_vec()),
            Self::Subscribe { packet_id, filters } => {
                let mut body = packet_id.to_be_bytes().to_vec();
                for (filter, qos) in filters {
                    push_string(&mut body, filter);
                    body.push(*qos);
                }
                (0x82, body)
            }
            Self::SubAck { packet_id, codes } => {
                let mut body = packet_id.to_be_bytes().to_vec();
                body.extend_from_slice(codes);
                (0x90, body)
            }
            Self::Unsubscribe { packet_id, filters } => {
                let mut body = packet_id.to_be_bytes().to_vec();
                for filter in filters {
                    push_string(&mut body, filter);
                }
                (0xA2, body)
            }
            Self::UnsubAck(id) => (0xB0, id.to_be_bytes().to_vec()),
            Self::PingReq => (0xC0, Vec::new()),
            Self::PingResp => (0xD0, Vec::new()),
            Self::Disconnect => (0xE0, Vec::new()),
        };
        let mut out = vec![first];
        encode_remaining_length(body.len(), &mut out);
        out.extend_from_slice(&body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(packet: Packet) -> Packet {
        let bytes = packet.encode();
        let mut cursor = std::io::Cursor::new(bytes);
        read_packet(&mut cursor).await.expect("decode")
    }

    #[tokio::test]
    async fn connect_roundtrip() {
        let packet = Packet::Connect {
            client_id: "sensor-1".to_string(),
            clean_session: true,
            keep_alive: 60,
            will: Some(LastWill {
                topic: "devices/sensor-1/status".to_string(),
                payload: b"offline".to_vec(),
                qos: 1,
                retain: true,
            }),
            username: Some("user".to_string()),
            password: Some(b"secret".to_vec()),
        };
        assert_eq!(roundtrip(packet.clone()).await, packet);
    }

    #[tokio::test]
    async fn publish_roundtrip_all_qos() {
        for qos in 0..=2u8 {
            let packet = Packet::Publish {
                dup: false,
                qos,
                retain: qos == 1,
                topic: "devices/status".to_string(),
                packet_id: (qos > 0).then_some(7),
                payload: b"online".to_vec(),
            };
            assert_eq!(roundtrip(packet.clone()).await, packet);
        }
    }

    #[tokio::test]
    async fn subscribe_suback_roundtrip() {
        let subscribe = Packet::Subscribe {
            packet_id: 3,
            filters: vec![("devices/#".to_string(), 1), ("alerts/+".to_string(), 0)],
        };
        assert_eq!(roundtrip(subscribe.clone()).await, subscribe);

        let suback = Packet::SubAck {
            packet_id: 3,
            codes: vec![1, 0x80],
        };
        assert_eq!(roundtrip(suback.clone()).await, suback);
    }

    #[tokio::test]
    async fn large_remaining_length() {
        let packet = Packet::Publish {
            dup: false,
            qos: 0,
            retain: false,
            topic: "big".to_string(),
            packet_id: None,
            payload: vec![0xAB; 100_000],
        };
        let decoded = roundtrip(packet.clone()).await;
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn rejects_wrong_protocol_name() {
        let mut body = Vec::new();
        push_string(&mut body, "MQIsdp");
        body.push(3);
        let err = Packet::parse(0x10, &body).expect_err("bad name");
        assert!(matches!(err, ProtocolError::InvalidProtocolName(_)));
    }

    #[tokio::test]
    async fn empty_subscribe_is_malformed() {
        let body = 5u16.to_be_bytes().to_vec();
        let err = Packet::parse(0x82, &body).expect_err("no filters");
        assert!(matches!(err, ProtocolError::MalformedPacket));
    }
}
