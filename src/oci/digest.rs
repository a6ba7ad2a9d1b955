use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

pub const SHA256_PREFIX: &str = "sha256:";

/// A content digest in `algorithm:encoded` form.
///
/// Any well-formed algorithm is accepted when parsing, since references may
/// name digests produced elsewhere; only `sha256` can be computed or verified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    pub fn sha256(bytes: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            encoded: sha256_hex(bytes),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (algorithm, encoded) = value.split_once(':')?;
        if !is_valid_algorithm(algorithm) || !is_valid_encoded(encoded) {
            return None;
        }
        if algorithm == "sha256" && !is_valid_sha256_hex(encoded) {
            return None;
        }
        Some(Self {
            algorithm: algorithm.to_string(),
            encoded: encoded.to_string(),
        })
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn matches(&self, bytes: &[u8]) -> bool {
        self.algorithm == "sha256" && self.encoded == sha256_hex(bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s).ok_or_else(|| format!("invalid digest '{s}'"))
    }
}

impl TryFrom<String> for Digest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(output, "{:02x}", byte);
    }
    output
}

pub fn prefixed_sha256_digest(bytes: &[u8]) -> String {
    format!("{SHA256_PREFIX}{}", sha256_hex(bytes))
}

pub fn is_valid_sha256_digest(digest: &str) -> bool {
    if let Some(hex) = digest.strip_prefix(SHA256_PREFIX) {
        return is_valid_sha256_hex(hex);
    }
    false
}

fn is_valid_sha256_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

// algorithm-component (separator algorithm-component)*
fn is_valid_algorithm(value: &str) -> bool {
    !value.is_empty()
        && value.split(['+', '.', '_', '-']).all(|part| {
            !part.is_empty()
                && part
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
}

fn is_valid_encoded(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn sha256_of_known_bytes() {
        let digest = Digest::sha256(b"hello");
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.encoded(), HELLO_SHA256);
        assert_eq!(digest.to_string(), format!("sha256:{HELLO_SHA256}"));
        assert_eq!(prefixed_sha256_digest(b"hello"), digest.to_string());
    }

    #[test]
    fn parse_accepts_well_formed_digests() {
        let parsed = Digest::parse(&format!("sha256:{HELLO_SHA256}")).unwrap();
        assert!(parsed.matches(b"hello"));
        assert!(!parsed.matches(b"goodbye"));

        let other = Digest::parse("sha512+b64u:LCa0a2j_xo_5m0U8HTBBNBNCLXBkg7-g").unwrap();
        assert_eq!(other.algorithm(), "sha512+b64u");
        assert!(!other.matches(b"hello"));
    }

    #[test]
    fn parse_rejects_malformed_digests() {
        assert!(Digest::parse("latest").is_none());
        assert!(Digest::parse("sha256:").is_none());
        assert!(Digest::parse("sha256:abc").is_none());
        assert!(Digest::parse(&format!("sha256:{}", HELLO_SHA256.to_uppercase())).is_none());
        assert!(Digest::parse(&format!("SHA256:{HELLO_SHA256}")).is_none());
        assert!(Digest::parse(":abc").is_none());
    }

    #[test]
    fn serde_uses_string_form() {
        let digest = Digest::sha256(b"hello");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"sha256:{HELLO_SHA256}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
        assert!(serde_json::from_str::<Digest>("\"nope\"").is_err());
    }

    #[test]
    fn sha256_digest_validation() {
        assert!(is_valid_sha256_digest(&format!("sha256:{HELLO_SHA256}")));
        assert!(!is_valid_sha256_digest(HELLO_SHA256));
    }
}
