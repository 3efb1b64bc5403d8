//! Bounded yEnc decoding for header probes.
//!
//! The triage engine never reconstructs whole files; it decodes just enough
//! of the first segment to hand a prefix to the archive inspector, so the
//! decoder takes a hard output cap and stops as soon as it is reached.

use crate::error::{ErrorKind, NntpError};

/// Decode the leading bytes of a yEnc-encoded article body.
///
/// The body is interpreted as CRLF-delimited lines. Lines before `=ybegin`
/// are skipped, `=ypart` is skipped, `=yend` terminates decoding. Within data
/// lines, `=` escapes the following byte (`((n - 64) - 42) mod 256`) and every
/// other byte decodes as `(c - 42) mod 256`. At most `max_bytes` output bytes
/// are produced.
///
/// Errors with [`ErrorKind::DecodeError`] when zero output bytes were
/// produced (no `=ybegin` marker, or an empty payload).
pub fn decode_prefix(body: &[u8], max_bytes: usize) -> Result<Vec<u8>, NntpError> {
    let mut decoded = Vec::with_capacity(max_bytes.min(body.len()));
    let mut in_data = false;

    'lines: for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if !in_data {
            if line.starts_with(b"=ybegin") {
                in_data = true;
            }
            continue;
        }
        if line.starts_with(b"=ypart") {
            continue;
        }
        if line.starts_with(b"=yend") {
            break;
        }

        let mut iter = line.iter().copied();
        while let Some(byte) = iter.next() {
            if decoded.len() >= max_bytes {
                break 'lines;
            }
            if byte == b'=' {
                if let Some(next) = iter.next() {
                    decoded.push(next.wrapping_sub(64).wrapping_sub(42));
                }
            } else {
                decoded.push(byte.wrapping_sub(42));
            }
        }
    }

    if decoded.is_empty() {
        return Err(NntpError::new(
            ErrorKind::DecodeError,
            "yEnc decode produced no data",
        ));
    }
    Ok(decoded)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// Encode plain bytes as a single-part yEnc block with standard escaping.
    fn encode(plain: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"=ybegin line=128 size=");
        out.extend_from_slice(plain.len().to_string().as_bytes());
        out.extend_from_slice(b" name=test.bin\r\n");
        for &b in plain {
            let enc = b.wrapping_add(42);
            // NUL, CR, LF, and '=' must be escaped
            if enc == 0x00 || enc == 0x0A || enc == 0x0D || enc == b'=' {
                out.push(b'=');
                out.push(enc.wrapping_add(64));
            } else {
                out.push(enc);
            }
        }
        out.extend_from_slice(b"\r\n=yend size=");
        out.extend_from_slice(plain.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn round_trips_known_bytes() {
        let plain: Vec<u8> = (0u8..=255).collect();
        let body = encode(&plain);
        let decoded = decode_prefix(&body, 4096).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn honors_the_output_cap() {
        let plain = b"0123456789abcdef";
        let body = encode(plain);
        let decoded = decode_prefix(&body, 7).unwrap();
        assert_eq!(decoded, b"0123456");
    }

    #[test]
    fn skips_headers_and_ypart() {
        let plain = b"Rar!";
        let mut body = Vec::new();
        body.extend_from_slice(b"X-Ignored: header noise\r\n\r\n");
        body.extend_from_slice(b"=ybegin part=1 total=2 line=128 size=4 name=a.rar\r\n");
        body.extend_from_slice(b"=ypart begin=1 end=4\r\n");
        for &b in plain {
            body.push(b.wrapping_add(42));
        }
        body.extend_from_slice(b"\r\n=yend size=4 part=1\r\n");
        let decoded = decode_prefix(&body, 64).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn no_ybegin_is_a_decode_error() {
        let err = decode_prefix(b"plain text body\r\nmore\r\n", 64).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecodeError);
        assert!(!err.drop_client);
    }

    #[test]
    fn empty_payload_is_a_decode_error() {
        let err = decode_prefix(b"=ybegin size=0 name=x\r\n=yend size=0\r\n", 64).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecodeError);
    }

    #[test]
    fn escaped_bytes_decode_exactly() {
        // 0x13 + 42 = 0x3D ('='), so 0x13 must arrive escaped
        let plain = [0x13u8, 0x00, 0xE3, 0xD3];
        let body = encode(&plain);
        let decoded = decode_prefix(&body, 16).unwrap();
        assert_eq!(decoded, plain);
    }
}
