//! Link and delivery identifiers.

use bytes::Bytes;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Link handle, unique per session while the link is attached.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Display, From, Serialize,
    Deserialize,
)]
pub struct Handle(u32);

impl Handle {
    /// Create a handle from its wire value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The wire value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Delivery identifier, a 32-bit serial number allocated per link direction.
///
/// Ordering on this type is numeric so it can key ordered maps. Use
/// [`DeliveryId::precedes`] for RFC-1982 serial comparison across wrap.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Display, From, Serialize,
    Deserialize,
)]
pub struct DeliveryId(u32);

impl DeliveryId {
    /// Create a delivery id from its wire value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The wire value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The id following this one, wrapping at `u32::MAX`.
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Serial-number "less than": `self` comes before `other` within half the id space.
    pub const fn precedes(self, other: Self) -> bool {
        let diff = other.0.wrapping_sub(self.0);
        diff != 0 && diff < (1 << 31)
    }
}

/// Opaque correlator chosen by the sender of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, From)]
pub struct DeliveryTag(Bytes);

impl DeliveryTag {
    /// Create a tag from arbitrary bytes.
    pub fn new(tag: impl Into<Bytes>) -> Self {
        Self(tag.into())
    }

    /// Default tag for a delivery: the big-endian encoding of its id.
    pub fn from_id(id: DeliveryId) -> Self {
        Self(Bytes::copy_from_slice(&id.get().to_be_bytes()))
    }

    /// The raw tag bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&'static [u8]> for DeliveryTag {
    fn from(tag: &'static [u8]) -> Self {
        Self(Bytes::from_static(tag))
    }
}

/// Role of a link endpoint. On the wire `false` is sender, `true` is receiver.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The endpoint transmits transfers.
    Sender,
    /// The endpoint receives transfers.
    Receiver,
}

impl Role {
    /// The role at the other end of the link.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }

    /// Wire encoding of the role.
    pub const fn as_bool(self) -> bool {
        matches!(self, Self::Receiver)
    }

    /// Decode the wire boolean.
    pub const fn from_bool(value: bool) -> Self {
        if value { Self::Receiver } else { Self::Sender }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_id_wraps() {
        let last = DeliveryId::new(u32::MAX);
        assert_eq!(last.next(), DeliveryId::new(0));
    }

    #[test]
    fn test_serial_precedes_across_wrap() {
        assert!(DeliveryId::new(1).precedes(DeliveryId::new(2)));
        assert!(DeliveryId::new(u32::MAX).precedes(DeliveryId::new(3)));
        assert!(!DeliveryId::new(3).precedes(DeliveryId::new(u32::MAX)));
        assert!(!DeliveryId::new(7).precedes(DeliveryId::new(7)));
    }

    #[test]
    fn test_default_tag_is_big_endian_id() {
        let tag = DeliveryTag::from_id(DeliveryId::new(0x0102_0304));
        assert_eq!(tag.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_role_wire_encoding() {
        assert_eq!(Role::from_bool(false), Role::Sender);
        assert_eq!(Role::from_bool(true), Role::Receiver);
        assert!(Role::Receiver.as_bool());
        assert_eq!(Role::Sender.opposite(), Role::Receiver);
        assert_eq!(Role::Receiver.to_string(), "receiver");
    }
}
