pub(crate) fn has_lone_cr_or_lf(data: &[u8]) -> bool {
    for i in memchr::memchr2_iter(b'\r', b'\n', data) {
        match data[i] {
            b'\r' => {
                if data.get(i + 1).copied() != Some(b'\n') {
                    return true;
                }
            }
            b'\n' => {
                if i == 0 || data[i - 1] != b'\r' {
                    return true;
                }
            }
            _ => unreachable!(),
        }
    }
    false
}

/// Reduce both CRLF and lone CR line endings to LF, the form exposed
/// by the decoded-text accessor.
pub(crate) fn line_endings_to_lf(text: &str) -> String {
    let data = text.as_bytes();
    let mut normalized = String::with_capacity(text.len());
    let mut last_idx = 0;

    for i in memchr::memchr_iter(b'\r', data) {
        if i < last_idx {
            continue;
        }
        normalized.push_str(&text[last_idx..i]);
        normalized.push('\n');
        last_idx = if data.get(i + 1).copied() == Some(b'\n') {
            i + 2
        } else {
            i + 1
        };
    }

    normalized.push_str(&text[last_idx..]);
    normalized
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loner() {
        assert!(!has_lone_cr_or_lf(b""));
        assert!(!has_lone_cr_or_lf(b"hello"));
        assert!(!has_lone_cr_or_lf(b"hello\r\nthere"));
        assert!(!has_lone_cr_or_lf(b"\r\nhello\r\nthere\r\n"));
        assert!(has_lone_cr_or_lf(b"hello\n"));
        assert!(has_lone_cr_or_lf(b"hello\r"));
        assert!(has_lone_cr_or_lf(b"\nhello\r\nthere\r\n"));
        assert!(has_lone_cr_or_lf(b"hello\r\nthere\n"));
        assert!(has_lone_cr_or_lf(b"hello\r\r\r\nthere\n"));
    }

    #[test]
    fn to_lf() {
        k9::assert_equal!(line_endings_to_lf("hello\r\nthere\r\n"), "hello\nthere\n");
        k9::assert_equal!(line_endings_to_lf("hello\nthere\n"), "hello\nthere\n");
        k9::assert_equal!(line_endings_to_lf("hello\rthere"), "hello\nthere");
        k9::assert_equal!(line_endings_to_lf("plain"), "plain");
    }
}
