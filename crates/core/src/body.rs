//! Response payloads and their wire lengths.
//!
//! The engine emits three kinds of content: already-encoded text, raw
//! bytes, and streams of unknown length. Text lengths are charset-aware so
//! `HEAD` responses can advertise the byte count the corresponding `GET`
//! would have produced.

use std::fmt;

use bytes::Bytes;
use http_body::Body;
use http_body_util::combinators::UnsyncBoxBody;

use crate::adapter::BoxError;

/// Validated response output: the content type to put on the wire plus the
/// content itself.
#[derive(Debug)]
pub struct ResponsePayload {
    pub content_type: String,
    pub content: ResponseContent,
}

impl ResponsePayload {
    pub fn new(content_type: impl Into<String>, content: ResponseContent) -> Self {
        Self { content_type: content_type.into(), content }
    }
}

/// Content handed to the adapter's send primitive.
pub enum ResponseContent {
    /// Text, encoded per the `charset` parameter of the content type
    /// (UTF-8 when absent).
    Text(String),
    /// Pre-encoded bytes, sent verbatim.
    Bytes(Bytes),
    /// A streaming body of unknown length.
    Stream(UnsyncBoxBody<Bytes, BoxError>),
}

impl ResponseContent {
    pub fn stream<B>(body: B) -> Self
    where
        B: Body<Data = Bytes, Error = BoxError> + Send + 'static,
    {
        Self::Stream(UnsyncBoxBody::new(body))
    }

    /// The number of bytes this content occupies on the wire, when knowable
    /// without consuming it. Streams report `None`.
    pub fn content_length(&self, content_type: Option<&str>) -> Option<u64> {
        match self {
            Self::Text(text) => Some(encoded_len(text, content_type.and_then(charset_parameter))),
            Self::Bytes(bytes) => Some(bytes.len() as u64),
            Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for ResponseContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Extracts the `charset` parameter from a content-type value, tolerating
/// arbitrary casing, whitespace and quoting.
fn charset_parameter(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|parameter| {
        let (key, value) = parameter.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

fn encoded_len(text: &str, charset: Option<&str>) -> u64 {
    let charset = charset.map(str::to_ascii_lowercase);
    match charset.as_deref() {
        // one- and two-byte families; everything unknown falls back to UTF-8
        Some("utf-16le" | "utf16le" | "utf-16be" | "utf16be" | "utf-16" | "utf16") => {
            text.encode_utf16().count() as u64 * 2
        }
        Some("us-ascii" | "ascii" | "iso-8859-1" | "latin1") => text.chars().count() as u64,
        _ => text.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_charset_doubles_code_units() {
        let content = ResponseContent::Text("Data".to_owned());
        assert_eq!(content.content_length(Some("contentType; charset=utf16le")), Some(8));
        assert_eq!(content.content_length(Some("text/plain; charset=UTF-16LE")), Some(8));
    }

    #[test]
    fn default_charset_is_utf8() {
        let content = ResponseContent::Text("héllo".to_owned());
        assert_eq!(content.content_length(Some("text/plain")), Some(6));
        assert_eq!(content.content_length(None), Some(6));
    }

    #[test]
    fn latin1_counts_characters() {
        let content = ResponseContent::Text("héllo".to_owned());
        assert_eq!(content.content_length(Some("text/plain; charset=\"iso-8859-1\"")), Some(5));
    }

    #[test]
    fn bytes_report_their_length_regardless_of_charset() {
        let content = ResponseContent::Bytes(Bytes::from_static(b"abc"));
        assert_eq!(content.content_length(Some("application/octet-stream; charset=utf16le")), Some(3));
    }

    #[test]
    fn streams_have_unknown_length() {
        let empty = http_body_util::Empty::<Bytes>::new();
        let content = ResponseContent::stream(http_body_util::BodyExt::map_err(empty, |never| match never {}));
        assert_eq!(content.content_length(None), None);
    }
}
