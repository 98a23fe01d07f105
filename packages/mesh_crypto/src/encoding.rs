//! Shared encoding helpers: URL-safe base64 (unpadded) and grouped hex.

/// URL-safe base64, unpadded.
pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    data_encoding::BASE64URL_NOPAD.encode(bytes)
}

/// Decode URL-safe base64, unpadded.
pub(crate) fn base64_decode(s: &str) -> Result<Vec<u8>, data_encoding::DecodeError> {
    data_encoding::BASE64URL_NOPAD.decode(s.as_bytes())
}

/// Lowercase hex split into space-separated blocks of `group` characters.
pub(crate) fn grouped_hex(bytes: &[u8], group: usize) -> String {
    let hex = data_encoding::HEXLOWER.encode(bytes);
    hex.as_bytes()
        .chunks(group)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
