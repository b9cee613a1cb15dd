use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// `call_` followed by 8 hex chars, unique within the process.
#[inline]
pub(crate) fn next_call_id() -> String {
    let seq = CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = mix_u64(seq ^ fastrand::u64(..));
    let mut out = String::with_capacity(13);
    out.push_str("call_");
    push_hex_lower(&mut out, mixed, 8);
    out
}

/// `prefix` followed by `hex_len` random lowercase hex chars.
pub(crate) fn random_hex_id(prefix: &str, hex_len: usize) -> String {
    let mut out = String::with_capacity(prefix.len() + hex_len);
    out.push_str(prefix);
    let mut remaining = hex_len;
    while remaining > 0 {
        let take = remaining.min(16);
        push_hex_lower(&mut out, fastrand::u64(..), take);
        remaining -= take;
    }
    out
}

#[inline]
fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Mask a credential for logging: `***` for short values, otherwise the
/// first and last four characters.
#[must_use]
pub fn mask_credential(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, mut n: u64) {
    if n == 0 {
        out.push('0');
        return;
    }

    let mut buf = [0u8; 20];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + ((n % 10) as u8);
        n /= 10;
    }
    let digits = std::str::from_utf8(&buf[i..]).unwrap_or("0");
    out.push_str(digits);
}

#[inline]
pub(crate) fn push_usize_decimal(out: &mut String, n: usize) {
    push_u64_decimal(out, n as u64);
}

#[inline]
fn push_hex_lower(out: &mut String, mut value: u64, digits: usize) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in &buf[16 - digits.min(16)..] {
        out.push(char::from(*byte));
    }
}

#[cfg(test)]
mod tests {
    use super::{mask_credential, next_call_id, push_json_string_escaped, random_hex_id};

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "emoji \u{1F600} caf\u{e9}",
            "mix \"\u{1F600}\\\n\t\r\u{0000}",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn mask_credential_hides_middle() {
        assert_eq!(mask_credential(""), "***");
        assert_eq!(mask_credential("12345678"), "***");
        assert_eq!(mask_credential("abcd-secret-wxyz"), "abcd...wxyz");
    }

    #[test]
    fn generated_ids_have_expected_shape() {
        let call = next_call_id();
        assert!(call.starts_with("call_"));
        assert_eq!(call.len(), 13);

        let msg = random_hex_id("msg_", 24);
        assert_eq!(msg.len(), 28);
        assert!(msg[4..].bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(random_hex_id("msg_", 24), msg);
    }
}
