//! Head-pose datagrams for OpenTrack-style UDP consumers

use bytes::{Buf, BufMut, Bytes, BytesMut};
use contracts::{Payload, PayloadEnvelope};
use serde::{Deserialize, Serialize};

/// Event name used for head-pose envelopes
pub const HEAD_POSE_EVENT: &str = "head.pose";

/// Six degrees of freedom: translation in centimetres, rotation in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPosePacket {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl HeadPosePacket {
    /// "UDP over network" layout: six little-endian f64
    pub const WIRE_LEN: usize = 48;
    /// Compact layout: six little-endian f32, rotation first
    pub const BRIDGE_LEN: usize = 24;

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        for v in [self.x, self.y, self.z, self.yaw, self.pitch, self.roll] {
            buf.put_f64_le(v);
        }
        buf.freeze()
    }

    /// `None` unless `data` is exactly [`Self::WIRE_LEN`] bytes
    pub fn from_bytes(mut data: &[u8]) -> Option<Self> {
        if data.len() != Self::WIRE_LEN {
            return None;
        }
        Some(Self {
            x: data.get_f64_le(),
            y: data.get_f64_le(),
            z: data.get_f64_le(),
            yaw: data.get_f64_le(),
            pitch: data.get_f64_le(),
            roll: data.get_f64_le(),
        })
    }

    /// yaw, pitch, roll, x, y, z as f32
    pub fn to_bridge_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::BRIDGE_LEN);
        for v in [self.yaw, self.pitch, self.roll, self.x, self.y, self.z] {
            buf.put_f32_le(v as f32);
        }
        buf.freeze()
    }

    /// Envelope carrying the 48-byte datagram
    pub fn into_envelope(self) -> PayloadEnvelope {
        PayloadEnvelope::new(HEAD_POSE_EVENT, Payload::Bytes(self.to_bytes()))
    }
}
