//! Quoted-printable decoding (RFC 2045 §6.7).

/// Decode a quoted-printable payload.
///
/// `=XY` (hex, either case) becomes one byte, `=` followed by optional
/// trailing whitespace and a line break is a soft break and disappears.
/// Malformed escapes are kept as-is.
pub fn decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let b = input[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }

        // Hex escape.
        if let (Some(&hi), Some(&lo)) = (input.get(i + 1), input.get(i + 2)) {
            if let (Some(hi), Some(lo)) = (hex_value(hi), hex_value(lo)) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }

        // Soft line break, possibly with transport padding before it.
        let mut j = i + 1;
        while matches!(input.get(j), Some(b' ' | b'\t')) {
            j += 1;
        }
        match input.get(j) {
            Some(b'\r') => {
                j += 1;
                if input.get(j) == Some(&b'\n') {
                    j += 1;
                }
                i = j;
            }
            Some(b'\n') => i = j + 1,
            None => i = j,
            Some(_) => {
                out.push(b'=');
                i += 1;
            }
        }
    }

    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hex_escapes() {
        assert_eq!(decode(b"caf=C3=A9"), "café".as_bytes());
        assert_eq!(decode(b"a=3db"), b"a=b");
    }

    #[test]
    fn removes_soft_line_breaks() {
        assert_eq!(decode(b"long=\r\nline"), b"longline");
        assert_eq!(decode(b"long=\nline"), b"longline");
        assert_eq!(decode(b"pad=  \r\nded"), b"padded");
        assert_eq!(decode(b"trailing="), b"trailing");
    }

    #[test]
    fn keeps_malformed_escapes() {
        assert_eq!(decode(b"50=ZZ off"), b"50=ZZ off");
        assert_eq!(decode(b"x=4"), b"x=4");
    }

    #[test]
    fn hard_line_breaks_survive() {
        assert_eq!(decode(b"one\r\ntwo"), b"one\r\ntwo");
    }

    #[test]
    fn binary_bytes_pass_through() {
        assert_eq!(decode(&[0xff, b'=', b'0', b'0', 0x80]), vec![0xff, 0x00, 0x80]);
    }
}
