//! Identifiers carried by every request: the correlation ID assigned at the
//! edge, and the 128-bit trace / 64-bit span identifiers used for
//! distributed tracing.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced when parsing a hex-encoded trace or span identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdError {
    /// The input had a length the identifier does not accept.
    #[error("expected {expected} hex characters, got {actual}")]
    Length {
        /// Human-readable description of the accepted lengths.
        expected: &'static str,
        /// Length of the rejected input.
        actual: usize,
    },
    /// The input contained a character outside `[0-9a-fA-F]`.
    #[error("identifier contains non-hex characters: {0:?}")]
    NotHex(String),
    /// The input decoded to zero, which B3 reserves as "invalid".
    #[error("identifier must not be all zeros")]
    Zero,
}

fn check_hex(input: &str) -> Result<(), ParseIdError> {
    // `from_str_radix` tolerates a leading '+', so the charset is checked first.
    if input.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ParseIdError::NotHex(input.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TraceId
// ---------------------------------------------------------------------------

/// A non-zero 128-bit trace identifier.
///
/// Always rendered as 32 lowercase hex characters. Parsing accepts the
/// 64-bit (16 character) form as well, left-padding it with zeros.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// Wraps a raw value, rejecting zero.
    #[must_use]
    pub fn from_u128(value: u128) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    /// Builds an identifier from big-endian bytes, rejecting all-zero input.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Option<Self> {
        Self::from_u128(u128::from_be_bytes(bytes))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn to_u128(self) -> u128 {
        self.0
    }

    /// Returns the identifier as big-endian bytes.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Mints a fresh random identifier.
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::rng();
        loop {
            let value: u128 = rng.random();
            if value != 0 {
                return Self(value);
            }
        }
    }

    /// Parses a 16 or 32 character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseIdError`] for any other length, non-hex input, or zero.
    pub fn parse_hex(input: &str) -> Result<Self, ParseIdError> {
        if input.len() != 16 && input.len() != 32 {
            return Err(ParseIdError::Length {
                expected: "16 or 32",
                actual: input.len(),
            });
        }
        check_hex(input)?;
        let value = u128::from_str_radix(input, 16)
            .map_err(|_| ParseIdError::NotHex(input.to_string()))?;
        Self::from_u128(value).ok_or(ParseIdError::Zero)
    }
}

impl FromStr for TraceId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({self})")
    }
}

// ---------------------------------------------------------------------------
// SpanId
// ---------------------------------------------------------------------------

/// A non-zero 64-bit span identifier, rendered as 16 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// Wraps a raw value, rejecting zero.
    #[must_use]
    pub fn from_u64(value: u64) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    /// Builds an identifier from big-endian bytes, rejecting all-zero input.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Option<Self> {
        Self::from_u64(u64::from_be_bytes(bytes))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Returns the identifier as big-endian bytes.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Mints a fresh random identifier.
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::rng();
        loop {
            let value: u64 = rng.random();
            if value != 0 {
                return Self(value);
            }
        }
    }

    /// Parses a 16 character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseIdError`] for any other length, non-hex input, or zero.
    pub fn parse_hex(input: &str) -> Result<Self, ParseIdError> {
        if input.len() != 16 {
            return Err(ParseIdError::Length {
                expected: "16",
                actual: input.len(),
            });
        }
        check_hex(input)?;
        let value = u64::from_str_radix(input, 16)
            .map_err(|_| ParseIdError::NotHex(input.to_string()))?;
        Self::from_u64(value).ok_or(ParseIdError::Zero)
    }
}

impl FromStr for SpanId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({self})")
    }
}

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// Correlation identifier assigned to a request at the edge of the service.
///
/// Accepted from a caller when it is non-empty visible ASCII, otherwise
/// generated as a v4 UUID. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a new random v4 UUID request ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts a caller-supplied value, or returns `None` when it is empty
    /// or contains anything but visible ASCII.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_graphic()) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Returns the caller-supplied value if acceptable, otherwise a fresh ID.
    #[must_use]
    pub fn from_header_or_generate(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or_else(Self::generate)
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_accepts_128_bit_form() {
        let id = TraceId::parse_hex("463ac35c9f6413ad48485a3953bb6124").unwrap();
        assert_eq!(id.to_string(), "463ac35c9f6413ad48485a3953bb6124");
    }

    #[test]
    fn trace_id_left_pads_64_bit_form() {
        let id = TraceId::parse_hex("48485a3953bb6124").unwrap();
        assert_eq!(id.to_string(), "000000000000000048485a3953bb6124");
        assert_eq!(id.to_u128(), 0x4848_5a39_53bb_6124);
    }

    #[test]
    fn trace_id_rejects_bad_lengths() {
        for input in ["", "abc", "48485a3953bb61240", &"a".repeat(33)] {
            assert!(
                matches!(TraceId::parse_hex(input), Err(ParseIdError::Length { .. })),
                "{input:?} should be rejected on length"
            );
        }
    }

    #[test]
    fn trace_id_rejects_zero_and_non_hex() {
        assert_eq!(
            TraceId::parse_hex("0000000000000000"),
            Err(ParseIdError::Zero)
        );
        assert!(matches!(
            TraceId::parse_hex("+8485a3953bb6124"),
            Err(ParseIdError::NotHex(_))
        ));
        assert!(matches!(
            TraceId::parse_hex("zz485a3953bb6124"),
            Err(ParseIdError::NotHex(_))
        ));
    }

    #[test]
    fn trace_id_uppercase_is_normalized() {
        let id: TraceId = "463AC35C9F6413AD48485A3953BB6124".parse().unwrap();
        assert_eq!(id.to_string(), "463ac35c9f6413ad48485a3953bb6124");
    }

    #[test]
    fn span_id_requires_sixteen_chars() {
        assert!(SpanId::parse_hex("a2fb4a1d1a96d312").is_ok());
        assert!(SpanId::parse_hex("a2fb4a1d1a96d31").is_err());
        assert_eq!(
            SpanId::parse_hex("0000000000000000"),
            Err(ParseIdError::Zero)
        );
    }

    #[test]
    fn bytes_round_trip_through_big_endian() {
        let span = SpanId::from_u64(0x0102_0304_0506_0708).unwrap();
        assert_eq!(span.to_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(SpanId::from_bytes(span.to_bytes()), Some(span));
        assert_eq!(TraceId::from_bytes([0; 16]), None);
    }

    #[test]
    fn random_ids_are_non_zero_and_distinct() {
        let a = TraceId::random();
        let b = TraceId::random();
        assert_ne!(a.to_u128(), 0);
        assert_ne!(a, b);
        assert_ne!(SpanId::random().to_u64(), 0);
    }

    #[test]
    fn debug_shows_hex() {
        let span = SpanId::from_u64(0xff).unwrap();
        assert_eq!(format!("{span:?}"), "SpanId(00000000000000ff)");
    }

    #[test]
    fn request_id_accepts_visible_ascii() {
        let id = RequestId::parse("  abc-123  ").unwrap();
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn request_id_rejects_empty_and_control_chars() {
        assert!(RequestId::parse("").is_none());
        assert!(RequestId::parse("   ").is_none());
        assert!(RequestId::parse("a b").is_none());
        assert!(RequestId::parse("caf\u{e9}").is_none());
    }

    #[test]
    fn request_id_generates_uuid_when_absent() {
        let id = RequestId::from_header_or_generate(None);
        assert!(Uuid::parse_str(id.as_str()).is_ok());

        let fallback = RequestId::from_header_or_generate(Some(""));
        assert!(Uuid::parse_str(fallback.as_str()).is_ok());

        let kept = RequestId::from_header_or_generate(Some("upstream-id"));
        assert_eq!(kept.as_str(), "upstream-id");
    }
}
