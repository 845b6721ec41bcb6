use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// An opaque content address: the hex-encoded SHA-1 of whatever it summarizes.
///
/// `Digest` is deliberately a thin wrapper over raw bytes rather than a
/// richer multi-algorithm type — the engine only ever needs one algorithm,
/// and callers that want `BuildId`-shaped values derive them by hashing a
/// `Digest`'s own hex form together with other inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; 20]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Combine this digest with another value's bytes, producing a new
    /// digest over the concatenation. Used to build `BuildId`s over a
    /// step's own digest plus its upstream result hashes.
    pub fn combine<I: IntoIterator<Item = Digest>>(self, rest: I) -> Digest {
        let mut data = Vec::with_capacity(20 * 2);
        data.extend_from_slice(&self.0);
        for d in rest {
            data.extend_from_slice(&d.0);
        }
        crate::sha1_bytes(&data)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&as_hex(&self.0))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("malformed digest '{0}': expected 40 lowercase hex characters")]
pub struct MalformedDigest(pub String);

impl FromStr for Digest {
    type Err = MalformedDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MalformedDigest(s.to_owned()));
        }
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| MalformedDigest(s.to_owned()))?;
        }
        Ok(Digest(out))
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lowercase hex encoding of arbitrary bytes.
pub fn as_hex(bytes: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn round_trips_through_hex() {
        let d = crate::sha1_bytes(b"hello");
        let s = d.to_string();
        let parsed: Digest = s.parse().unwrap();
        assert_eq!(d, parsed);
    }

    #[rstest]
    #[case::too_short("deadbeef")]
    #[case::too_long(&"ab".repeat(21))]
    #[case::uppercase(&"AB".repeat(20))]
    #[case::non_hex(&"zz".repeat(20))]
    #[case::empty("")]
    fn rejects_malformed_strings(#[case] input: &str) {
        assert!(input.parse::<Digest>().is_err());
    }

    #[test]
    fn combine_is_order_sensitive() {
        let a = crate::sha1_bytes(b"a");
        let b = crate::sha1_bytes(b"b");
        assert_ne!(a.combine([b]), b.combine([a]));
    }
}
