//! Message identity fields
//!
//! Message id, correlation id, and group id are opaque byte strings with a
//! fixed maximum length, carried Base64-encoded at the API boundary. The
//! broker treats them as selectors and stamps, never interprets them.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of any identity field, in raw bytes
pub const MAX_ID_LEN: usize = 24;

macro_rules! identity_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Vec<u8>);

        impl $name {
            /// Wrap raw bytes, rejecting over-length input
            pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
                let bytes = bytes.into();
                if bytes.len() > MAX_ID_LEN {
                    return Err(Error::InvalidIdentity(format!(
                        "{} exceeds {} bytes ({})",
                        stringify!($name),
                        MAX_ID_LEN,
                        bytes.len()
                    )));
                }
                Ok(Self(bytes))
            }

            /// Decode from the Base64 boundary form
            pub fn from_base64(encoded: &str) -> Result<Self> {
                let bytes = BASE64
                    .decode(encoded)
                    .map_err(|e| Error::InvalidIdentity(format!("bad Base64: {}", e)))?;
                Self::from_bytes(bytes)
            }

            /// Encode to the Base64 boundary form
            pub fn to_base64(&self) -> String {
                BASE64.encode(&self.0)
            }

            /// Raw bytes
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            /// Generate a fresh, unique value (UUID bytes)
            pub fn generate() -> Self {
                Self(Uuid::now_v7().as_bytes().to_vec())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_base64())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_base64())
            }
        }
    };
}

identity_type! {
    /// Unique identity of one message
    MsgId
}

identity_type! {
    /// Correlates a reply with the request it answers
    CorrelId
}

identity_type! {
    /// Identity shared by every member of an ordered message group
    GroupId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        let id = MsgId::from_bytes(vec![0x01, 0x02, 0xff]).unwrap();
        let encoded = id.to_base64();
        let decoded = MsgId::from_base64(&encoded).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn test_over_length_rejected() {
        let result = GroupId::from_bytes(vec![0u8; MAX_ID_LEN + 1]);
        assert!(matches!(result, Err(Error::InvalidIdentity(_))));
    }

    #[test]
    fn test_bad_base64_rejected() {
        assert!(matches!(
            CorrelId::from_base64("not/valid!!"),
            Err(Error::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_generated_ids_are_unique_and_in_bounds() {
        let a = MsgId::generate();
        let b = MsgId::generate();
        assert_ne!(a, b);
        assert!(a.as_bytes().len() <= MAX_ID_LEN);
    }
}
