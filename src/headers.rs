use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};

pub(crate) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

pub(crate) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

pub(crate) fn connection_upgrade(value: &HeaderValue) -> bool {
    connection_has(value, "upgrade")
}

fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

pub(crate) fn content_length_parse(headers: &HeaderMap) -> Option<u64> {
    // If multiple Content-Length headers were sent, everything can still
    // be alright if they all contain the same value, and all parse
    // correctly. If not, then it's an error.
    let mut folded = None;
    for line in headers.get_all(CONTENT_LENGTH) {
        let n: u64 = line.to_str().ok()?.trim().parse().ok()?;
        match folded {
            Some(prev) if prev != n => return None,
            _ => folded = Some(n),
        }
    }
    folded
}

pub(crate) fn transfer_encoding_is_chunked(headers: &HeaderMap) -> bool {
    // chunked must always be the last encoding, according to spec
    if let Some(line) = headers.get_all(TRANSFER_ENCODING).iter().next_back() {
        if let Ok(s) = line.to_str() {
            if let Some(encoding) = s.rsplit(',').next() {
                return encoding.trim().eq_ignore_ascii_case("chunked");
            }
        }
    }
    false
}

/// Merge `extra` into `headers`, appending every pair.
///
/// Duplicates are preserved in insertion order so they are emitted as
/// repeated header lines on the wire.
pub(crate) fn merge(headers: &mut HeaderMap, extra: &HeaderMap) {
    for (name, value) in extra {
        headers.append(name.clone(), value.clone());
    }
}

/// Insert `value` under `name` unless the caller already supplied one.
pub(crate) fn set_if_missing(headers: &mut HeaderMap, name: HeaderName, value: HeaderValue) {
    if !headers.contains_key(&name) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONNECTION;

    fn val(s: &str) -> HeaderValue {
        HeaderValue::from_str(s).unwrap()
    }

    #[test]
    fn connection_tokens_are_case_insensitive() {
        assert!(connection_keep_alive(&val("Keep-Alive")));
        assert!(connection_keep_alive(&val("foo, keep-alive")));
        assert!(connection_close(&val("CLOSE")));
        assert!(!connection_close(&val("keep-alive")));
    }

    #[test]
    fn content_length_conflicts_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.append(CONTENT_LENGTH, val("10"));
        headers.append(CONTENT_LENGTH, val("10"));
        assert_eq!(content_length_parse(&headers), Some(10));

        headers.append(CONTENT_LENGTH, val("11"));
        assert_eq!(content_length_parse(&headers), None);
    }

    #[test]
    fn chunked_must_be_final_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, val("gzip, chunked"));
        assert!(transfer_encoding_is_chunked(&headers));

        headers.insert(TRANSFER_ENCODING, val("chunked, gzip"));
        assert!(!transfer_encoding_is_chunked(&headers));
    }

    #[test]
    fn merge_preserves_duplicates() {
        let mut base = HeaderMap::new();
        base.insert(CONNECTION, val("keep-alive"));
        let mut extra = HeaderMap::new();
        extra.append("x-tag", val("a"));
        extra.append("x-tag", val("b"));
        merge(&mut base, &extra);
        let tags: Vec<_> = base.get_all("x-tag").iter().collect();
        assert_eq!(tags, vec![&val("a"), &val("b")]);
    }
}
