use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

/// Characters percent-encoded inside a query key or value. The query
/// production of RFC 3986 plus the separators we use between pairs.
const QUERY_PART: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'&')
    .add(b'=')
    .add(b'+')
    .add(b'%');

/// Append one `key=value` pair to the url query, percent-encoding both
/// parts. Existing query content (already encoded) is preserved as is.
pub(crate) fn append_pair(url: &mut Url, key: &str, value: &str) {
    let pair = format!(
        "{}={}",
        utf8_percent_encode(key, QUERY_PART),
        utf8_percent_encode(value, QUERY_PART)
    );

    let query = match url.query() {
        Some(q) if !q.is_empty() => format!("{}&{}", q, pair),
        _ => pair,
    };

    url.set_query(Some(&query));
}

/// The request target for the head line: path plus query, percent-encoding
/// preserved as parsed.
pub(crate) fn request_target(url: &Url) -> String {
    let path = url.path();
    let path = if path.is_empty() { "/" } else { path };
    match url.query() {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn appends_encoded_pairs() {
        let mut url = Url::parse("http://x.test/path").unwrap();
        append_pair(&mut url, "foo", "bar baz");
        append_pair(&mut url, "a&b", "1=2");

        assert_eq!(url.query(), Some("foo=bar%20baz&a%26b=1%3D2"));
        assert_eq!(request_target(&url), "/path?foo=bar%20baz&a%26b=1%3D2");
    }

    #[test]
    fn preserves_existing_query() {
        let mut url = Url::parse("http://x.test/?q=1").unwrap();
        append_pair(&mut url, "r", "2");
        assert_eq!(request_target(&url), "/?q=1&r=2");
    }

    #[test]
    fn empty_path_becomes_slash() {
        let url = Url::parse("http://x.test").unwrap();
        assert_eq!(request_target(&url), "/");
    }
}
