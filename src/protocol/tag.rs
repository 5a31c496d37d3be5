//! Low-level codec for plain-text tag messages
//!
//! Every scanner-protocol message is a single ASCII tag of the form
//! `<tag a="1" b="2"/>` with unsigned decimal attribute values. Slice
//! headers additionally carry their own total byte length in a fixed-width
//! `L` attribute so the receiver can read the prefix first and learn how
//! many header bytes follow.

use crate::error::{Result, SliceLinkError};

/// Width of the zero-padded `L` (header length) attribute value
pub const LEN_WIDTH: usize = 5;

/// Width of the zero-padded volume-count attribute in close messages, and of
/// volume-index requests on the results protocol
pub const VOL_WIDTH: usize = 4;

/// Byte length of the fixed slice-header prefix: `<rec L="00034"`
///
/// The prefix alone encodes the total header length; the remaining
/// `L - SLICE_PREFIX_LEN` bytes are read in a second phase. This constant is
/// load-bearing: both sides count on it exactly.
pub const SLICE_PREFIX_LEN: usize = 8 + LEN_WIDTH + 1;

/// Upper bound on any single tag message, used to bound delimiter reads
pub const MAX_TAG_LEN: usize = 256;

/// Extract the unsigned decimal value of `key="..."` from a tag string
///
/// # Errors
///
/// [`SliceLinkError::InvalidMessage`] if the attribute is absent or its
/// value is not an unsigned decimal integer.
pub fn attr(text: &str, key: &str) -> Result<u64> {
    let pattern = format!("{}=\"", key);
    let start = text
        .find(&pattern)
        .map(|pos| pos + pattern.len())
        .ok_or_else(|| {
            SliceLinkError::InvalidMessage(format!("missing attribute {:?} in {:?}", key, text))
        })?;
    let rest = &text[start..];
    let end = rest.find('"').ok_or_else(|| {
        SliceLinkError::InvalidMessage(format!("unterminated attribute {:?} in {:?}", key, text))
    })?;
    rest[..end].parse::<u64>().map_err(|_| {
        SliceLinkError::InvalidMessage(format!(
            "attribute {:?} is not an unsigned integer in {:?}",
            key, text
        ))
    })
}

/// Like [`attr`], but checked against `u32::MAX`
pub fn attr_u32(text: &str, key: &str) -> Result<u32> {
    let value = attr(text, key)?;
    u32::try_from(value).map_err(|_| {
        SliceLinkError::InvalidMessage(format!("attribute {:?} overflows u32: {}", key, value))
    })
}

/// Tag name of a message, i.e. the characters between `<` and the first
/// space or `/`
pub fn tag_name(text: &str) -> Result<&str> {
    let inner = text
        .strip_prefix('<')
        .ok_or_else(|| SliceLinkError::InvalidMessage(format!("not a tag: {:?}", text)))?;
    let end = inner
        .find(|c: char| c == ' ' || c == '/' || c == '>')
        .ok_or_else(|| SliceLinkError::InvalidMessage(format!("unterminated tag: {:?}", text)))?;
    if end == 0 {
        return Err(SliceLinkError::InvalidMessage(format!(
            "empty tag name: {:?}",
            text
        )));
    }
    Ok(&inner[..end])
}

/// Zero-pad `value` to `width` decimal digits
///
/// # Errors
///
/// [`SliceLinkError::InvalidMessage`] if the value does not fit the fixed
/// width; widening the field would desynchronize prefix parsing on the
/// other side.
pub fn zero_pad(value: u64, width: usize) -> Result<String> {
    let text = format!("{:0width$}", value, width = width);
    if text.len() > width {
        return Err(SliceLinkError::InvalidMessage(format!(
            "value {} does not fit in {} digits",
            value, width
        )));
    }
    Ok(text)
}

/// Interpret raw tag bytes as ASCII text
pub fn tag_text(raw: &[u8]) -> Result<String> {
    let text = String::from_utf8(raw.to_vec())?;
    if !text.is_ascii() {
        return Err(SliceLinkError::InvalidMessage(format!(
            "non-ASCII tag: {:?}",
            text
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_extraction() {
        let text = r#"<opn x="64" y="64" z="18"/>"#;
        assert_eq!(attr(text, "x").unwrap(), 64);
        assert_eq!(attr(text, "z").unwrap(), 18);
    }

    #[test]
    fn test_attr_missing() {
        let text = r#"<opn x="64"/>"#;
        assert!(matches!(
            attr(text, "y"),
            Err(SliceLinkError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_attr_non_numeric() {
        let text = r#"<opn x="sixty-four"/>"#;
        assert!(attr(text, "x").is_err());
    }

    #[test]
    fn test_attr_zero_padded() {
        let text = r#"<rec L="00034" v="0" z="5" n="8192"/>"#;
        assert_eq!(attr(text, "L").unwrap(), 34);
        assert_eq!(attr(text, "n").unwrap(), 8192);
    }

    #[test]
    fn test_tag_name() {
        assert_eq!(tag_name(r#"<opn x="1"/>"#).unwrap(), "opn");
        assert_eq!(tag_name(r#"<end n="0003"/>"#).unwrap(), "end");
        assert!(tag_name("opn").is_err());
    }

    #[test]
    fn test_zero_pad() {
        assert_eq!(zero_pad(34, LEN_WIDTH).unwrap(), "00034");
        assert_eq!(zero_pad(3, VOL_WIDTH).unwrap(), "0003");
        assert!(zero_pad(123_456, LEN_WIDTH).is_err());
    }

    #[test]
    fn test_prefix_len_matches_wire_shape() {
        // `<rec L="` + five digits + closing quote
        assert_eq!(SLICE_PREFIX_LEN, r#"<rec L="00034""#.len());
    }

    #[test]
    fn test_tag_text_rejects_non_ascii() {
        assert!(tag_text("caf\u{e9}".as_bytes()).is_err());
        assert_eq!(tag_text(b"<opn/>").unwrap(), "<opn/>");
    }
}
