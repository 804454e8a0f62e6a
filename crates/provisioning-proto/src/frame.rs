//! Encoding and decoding of the four provisioning message types.
//!
//! Every frame begins with a 6-byte common header:
//! `msg_type(1) || node_address(4) || session_id(1)`. The suffix
//! after the header is type-specific; see [`Frame`].

use crate::error::CodecError;

const HEADER_LEN: usize = 6;

/// The four wire message types, tagged by their first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Node announces itself and requests provisioning.
    Start = 1,
    /// Server delivers the (optionally encrypted) configuration bundle.
    Data = 2,
    /// Node confirms receipt of `Data`.
    DataAck = 3,
    /// Server refuses to provision the node.
    Nack = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Start),
            2 => Ok(Self::Data),
            3 => Ok(Self::DataAck),
            4 => Ok(Self::Nack),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

/// Provisioning method requested by a node in its `Start` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    /// No authentication or encryption of the DATA payload.
    Unsecured = 0,
    /// MIC-authenticated and encrypted.
    Secured = 1,
    /// MIC-authenticated and encrypted, with an extended UID.
    Extended = 3,
}

impl TryFrom<u8> for Method {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unsecured),
            1 => Ok(Self::Secured),
            3 => Ok(Self::Extended),
            other => Err(CodecError::InvalidEnumValue {
                field: "method",
                value: other,
            }),
        }
    }
}

/// Reason a `Nack` frame gives for refusing provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NackReason {
    /// UID is not present in the configured whitelist.
    NotAuthorized = 0,
    /// UID is known but its method does not match the START request.
    MethodNotSupported = 1,
    /// Payload was structurally invalid.
    InvalidData = 2,
    /// Key material is invalid or unusable.
    InvalidKey = 3,
}

impl TryFrom<u8> for NackReason {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NotAuthorized),
            1 => Ok(Self::MethodNotSupported),
            2 => Ok(Self::InvalidData),
            3 => Ok(Self::InvalidKey),
            other => Err(CodecError::InvalidEnumValue {
                field: "reason",
                value: other,
            }),
        }
    }
}

/// A decoded (or to-be-encoded) provisioning frame.
///
/// `node_address` and `session_id` are common to every variant and
/// together with the envelope's `source_address` form the session
/// routing key (see the Session Router).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Node requests provisioning.
    Start {
        /// Mesh address of the requesting node.
        node_address: [u8; 4],
        /// Session identifier chosen by the node.
        session_id: u8,
        /// Requested provisioning method.
        method: Method,
        /// 16-byte node-supplied initialization value.
        iv: [u8; 16],
        /// Node unique identifier, 1..79 bytes.
        uid: Vec<u8>,
    },
    /// Server response carrying the configuration bundle.
    Data {
        /// Mesh address of the node this response is for.
        node_address: [u8; 4],
        /// Session identifier this response answers.
        session_id: u8,
        /// Which key was used (0 = none, 1 = factory key).
        key_index: u8,
        /// Monotone per-session counter, little-endian on the wire.
        counter: u16,
        /// CBOR-encoded bundle, plaintext or ciphertext depending on
        /// `key_index`.
        data: Vec<u8>,
        /// 5-byte MIC, or empty when unauthenticated.
        mic: Vec<u8>,
    },
    /// Node acknowledges a `Data` frame.
    DataAck {
        /// Mesh address of the acknowledging node.
        node_address: [u8; 4],
        /// Session identifier being acknowledged.
        session_id: u8,
    },
    /// Server declines to provision the node.
    Nack {
        /// Mesh address of the declined node.
        node_address: [u8; 4],
        /// Session identifier the refusal pertains to.
        session_id: u8,
        /// Reason for the refusal.
        reason: NackReason,
    },
}

impl Frame {
    /// Mesh address common to every frame variant.
    #[must_use]
    pub fn node_address(&self) -> [u8; 4] {
        match self {
            Self::Start { node_address, .. }
            | Self::Data { node_address, .. }
            | Self::DataAck { node_address, .. }
            | Self::Nack { node_address, .. } => *node_address,
        }
    }

    /// Session identifier common to every frame variant.
    #[must_use]
    pub fn session_id(&self) -> u8 {
        match self {
            Self::Start { session_id, .. }
            | Self::Data { session_id, .. }
            | Self::DataAck { session_id, .. }
            | Self::Nack { session_id, .. } => *session_id,
        }
    }

    /// Message type tag for this frame.
    #[must_use]
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Start { .. } => MessageType::Start,
            Self::Data { .. } => MessageType::Data,
            Self::DataAck { .. } => MessageType::DataAck,
            Self::Nack { .. } => MessageType::Nack,
        }
    }

    fn encode_header(buf: &mut Vec<u8>, msg_type: MessageType, node_address: [u8; 4], session_id: u8) {
        buf.push(msg_type as u8);
        buf.extend_from_slice(&node_address);
        buf.push(session_id);
    }

    /// Serialize this frame to its wire representation.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        match self {
            Self::Start {
                node_address,
                session_id,
                method,
                iv,
                uid,
            } => {
                Self::encode_header(&mut buf, MessageType::Start, *node_address, *session_id);
                buf.push(*method as u8);
                buf.extend_from_slice(iv);
                buf.extend_from_slice(uid);
            }
            Self::Data {
                node_address,
                session_id,
                key_index,
                counter,
                data,
                mic,
            } => {
                Self::encode_header(&mut buf, MessageType::Data, *node_address, *session_id);
                buf.push(*key_index);
                buf.extend_from_slice(&counter.to_le_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(mic);
            }
            Self::DataAck {
                node_address,
                session_id,
            } => {
                Self::encode_header(&mut buf, MessageType::DataAck, *node_address, *session_id);
            }
            Self::Nack {
                node_address,
                session_id,
                reason,
            } => {
                Self::encode_header(&mut buf, MessageType::Nack, *node_address, *session_id);
                buf.push(*reason as u8);
            }
        }
        buf
    }

    /// Parse a frame from its wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the buffer is too short, the
    /// message type is unrecognized, or a type-specific field
    /// violates its length/enum constraint. Decode failures are
    /// non-fatal: callers log and drop the frame.
    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        if raw.len() < HEADER_LEN {
            return Err(CodecError::TooShort {
                len: raw.len(),
                min: HEADER_LEN,
            });
        }
        let msg_type = MessageType::try_from(raw[0])?;
        let mut node_address = [0u8; 4];
        node_address.copy_from_slice(&raw[1..5]);
        let session_id = raw[5];
        let suffix = &raw[HEADER_LEN..];

        match msg_type {
            MessageType::Start => {
                if suffix.len() < 1 + 16 + 1 {
                    return Err(CodecError::TooShort {
                        len: raw.len(),
                        min: HEADER_LEN + 1 + 16 + 1,
                    });
                }
                let method = Method::try_from(suffix[0])?;
                let iv_slice = &suffix[1..17];
                let uid = &suffix[17..];
                if uid.is_empty() {
                    return Err(CodecError::InvalidLength {
                        field: "uid",
                        expected: ">=1",
                        actual: 0,
                    });
                }
                let mut iv = [0u8; 16];
                iv.copy_from_slice(iv_slice);
                Ok(Self::Start {
                    node_address,
                    session_id,
                    method,
                    iv,
                    uid: uid.to_vec(),
                })
            }
            MessageType::Data => {
                if suffix.len() < 3 {
                    return Err(CodecError::TooShort {
                        len: raw.len(),
                        min: HEADER_LEN + 3,
                    });
                }
                let key_index = suffix[0];
                let counter = u16::from_le_bytes([suffix[1], suffix[2]]);
                let rest = &suffix[3..];
                // key_index 0 means unsecured: no MIC, all of rest is
                // data. Any other key_index means the trailing 5
                // bytes are the MIC, matching how the session encodes
                // the two shapes.
                let (data, mic): (&[u8], &[u8]) = if key_index == 0 {
                    (rest, &rest[rest.len()..])
                } else {
                    if rest.len() < 5 {
                        return Err(CodecError::InvalidLength {
                            field: "mic",
                            expected: "5",
                            actual: rest.len(),
                        });
                    }
                    let split = rest.len() - 5;
                    (&rest[..split], &rest[split..])
                };
                if data.is_empty() {
                    return Err(CodecError::InvalidLength {
                        field: "data",
                        expected: ">=1",
                        actual: 0,
                    });
                }
                Ok(Self::Data {
                    node_address,
                    session_id,
                    key_index,
                    counter,
                    data: data.to_vec(),
                    mic: mic.to_vec(),
                })
            }
            MessageType::DataAck => Ok(Self::DataAck {
                node_address,
                session_id,
            }),
            MessageType::Nack => {
                if suffix.is_empty() {
                    return Err(CodecError::TooShort {
                        len: raw.len(),
                        min: HEADER_LEN + 1,
                    });
                }
                let reason = NackReason::try_from(suffix[0])?;
                Ok(Self::Nack {
                    node_address,
                    session_id,
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_start() -> Frame {
        Frame::Start {
            node_address: [1, 2, 3, 4],
            session_id: 0x42,
            method: Method::Secured,
            iv: [0u8; 16],
            uid: vec![0x00, 0x11, 0x12, 0x13],
        }
    }

    fn sample_data() -> Frame {
        Frame::Data {
            node_address: [1, 2, 3, 4],
            session_id: 0x42,
            key_index: 1,
            counter: 7,
            data: vec![0xAA; 10],
            mic: vec![0xBB; 5],
        }
    }

    #[test]
    fn round_trip_start() {
        let f = sample_start();
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn round_trip_data_with_mic() {
        let f = sample_data();
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn round_trip_data_unsecured_no_mic() {
        let f = Frame::Data {
            node_address: [1, 2, 3, 4],
            session_id: 1,
            key_index: 0,
            counter: 0,
            data: vec![0x01, 0x02, 0x03],
            mic: vec![],
        };
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn round_trip_data_ack() {
        let f = Frame::DataAck {
            node_address: [9, 9, 9, 9],
            session_id: 3,
        };
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn round_trip_nack() {
        let f = Frame::Nack {
            node_address: [9, 9, 9, 9],
            session_id: 3,
            reason: NackReason::MethodNotSupported,
        };
        assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn decode_rejects_unknown_message_type() {
        let raw = vec![0xFF, 1, 2, 3, 4, 0];
        assert_eq!(
            Frame::decode(&raw),
            Err(CodecError::UnknownMessageType(0xFF))
        );
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let raw = vec![1, 2, 3];
        assert!(matches!(
            Frame::decode(&raw),
            Err(CodecError::TooShort { .. })
        ));
    }

    #[test]
    fn decode_rejects_empty_uid() {
        let mut raw = vec![1, 1, 2, 3, 4, 0, 1];
        raw.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            Frame::decode(&raw),
            Err(CodecError::InvalidLength { field: "uid", .. })
        ));
    }

    #[test]
    fn decode_rejects_bad_nack_reason() {
        let raw = vec![4, 1, 2, 3, 4, 0, 9];
        assert!(matches!(
            Frame::decode(&raw),
            Err(CodecError::InvalidEnumValue { field: "reason", .. })
        ));
    }

    #[test]
    fn decode_rejects_bad_method() {
        let mut raw = vec![1, 1, 2, 3, 4, 0, 9];
        raw.extend_from_slice(&[0u8; 16]);
        raw.push(0xAB);
        assert!(matches!(
            Frame::decode(&raw),
            Err(CodecError::InvalidEnumValue { field: "method", .. })
        ));
    }
}
