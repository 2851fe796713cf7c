//! Opaque Relay cursors.
//!
//! A cursor encodes the absolute offset of an edge in its connection. The encoding is the one used
//! by graphql-relay-js: standard, padded base64 of `arrayconnection:<offset>`.

use super::page::Error;
use async_graphql::connection::CursorType;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use derive_more::{Display, From, Into};

const PREFIX: &str = "arrayconnection:";

/// Encode an offset as an opaque cursor.
pub fn encode(offset: usize) -> String {
    STANDARD.encode(format!("{PREFIX}{offset}"))
}

/// Decode a cursor produced by [`encode`].
pub fn decode(cursor: &str) -> Result<usize, Error> {
    let malformed = |reason| Error::MalformedCursor {
        cursor: cursor.to_string(),
        reason,
    };
    let bytes = STANDARD
        .decode(cursor)
        .map_err(|_| malformed("invalid base64"))?;
    let text = String::from_utf8(bytes).map_err(|_| malformed("invalid UTF-8"))?;
    let offset = text
        .strip_prefix(PREFIX)
        .ok_or_else(|| malformed("missing arrayconnection prefix"))?;
    // `usize::from_str` accepts a leading `+`, which `encode` never produces.
    if !offset.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("offset is not a non-negative integer"));
    }
    offset
        .parse()
        .map_err(|_| malformed("offset is not a non-negative integer"))
}

/// A cursor pointing at an absolute offset in a connection.
#[derive(Clone, Copy, Debug, Display, Default, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct OffsetCursor(usize);

impl OffsetCursor {
    pub fn offset(&self) -> usize {
        self.0
    }
}

impl CursorType for OffsetCursor {
    type Error = Error;

    fn decode_cursor(s: &str) -> Result<Self, Self::Error> {
        decode(s).map(Self)
    }

    fn encode_cursor(&self) -> String {
        encode(self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_encoding() {
        assert_eq!(encode(0), "YXJyYXljb25uZWN0aW9uOjA=");
        assert_eq!(encode(1), "YXJyYXljb25uZWN0aW9uOjE=");
        assert_eq!(decode("YXJyYXljb25uZWN0aW9uOjE=").unwrap(), 1);
    }

    #[test]
    fn test_malformed() {
        let cursors = [
            "".to_string(),
            "not base64!".to_string(),
            STANDARD.encode("arrayconnection:"),
            STANDARD.encode("arrayconnection:-1"),
            STANDARD.encode("arrayconnection:+1"),
            STANDARD.encode("arrayconnection:one"),
            STANDARD.encode("cursor:1"),
            STANDARD.encode([0xff, 0xfe]),
        ];
        for cursor in &cursors {
            assert!(
                matches!(decode(cursor), Err(Error::MalformedCursor { .. })),
                "{cursor:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_cursor_type() {
        let cursor = OffsetCursor::from(3);
        assert_eq!(
            OffsetCursor::decode_cursor(&cursor.encode_cursor()).unwrap(),
            cursor
        );
        assert!(OffsetCursor::decode_cursor("garbage").is_err());
    }

    proptest! {
        #[test]
        fn proptest_round_trip(offset in any::<usize>()) {
            prop_assert_eq!(decode(&encode(offset)).unwrap(), offset);
        }

        #[test]
        fn proptest_injective(a in 0..10_000usize, b in 0..10_000usize) {
            prop_assert_eq!(encode(a) == encode(b), a == b);
        }
    }
}
