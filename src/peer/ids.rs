//! Opaque, high-entropy identifiers: [`PeerId`] and [`SwarmId`].
//!
//! Both are rendered on the wire as lowercase hex, the natural
//! JSON-compatible representation of "opaque bytes" (mirrors how
//! `radicle-node` externally renders its own `NodeId`).
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Construct from raw bytes.
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// A fresh, random id drawn from `rng`.
            pub fn generate(rng: &mut fastrand::Rng) -> Self {
                let mut bytes = [0u8; 32];
                for byte in bytes.iter_mut() {
                    *byte = rng.u8(..);
                }
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..4]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                let bytes = hex::decode(&s).map_err(D::Error::custom)?;
                let bytes: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| D::Error::custom("expected 32 bytes of hex"))?;
                Ok(Self(bytes))
            }
        }
    };
}

opaque_id!(PeerId, "A peer's opaque, high-entropy identity.");
opaque_id!(SwarmId, "A swarm's opaque, high-entropy identifier.");
