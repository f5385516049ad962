use crate::utils::error::{HttpError, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const SECURE_PORT: u16 = 8443;

// General header fields
pub const CONTENT_TYPE: &str = "Content-Type";
pub const DATE: &str = "Date";
pub const PRAGMA: &str = "Pragma";
pub const CACHE_CONTROL: &str = "Cache-Control";
pub const CONNECTION: &str = "Connection";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_MD5: &str = "Content-MD5";
pub const UPGRADE: &str = "Upgrade";
pub const VIA: &str = "Via";
pub const WARNING: &str = "Warning";

// Request header fields
pub const ACCEPT: &str = "Accept";
pub const ACCEPT_CHARSET: &str = "Accept-Charset";
pub const ACCEPT_DATETIME: &str = "Accept-Datetime";
pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
pub const ACCEPT_LANGUAGE: &str = "Accept-Language";
pub const ACCESS_CONTROL_REQUEST_METHOD: &str = "Access-Control-Request-Method";
pub const ACCESS_CONTROL_REQUEST_HEADERS: &str = "Access-Control-Request-Headers";
pub const AUTHORIZATION: &str = "Authorization";
pub const COOKIE: &str = "Cookie";
pub const EXPECT: &str = "Expect";
pub const FORWARDED: &str = "Forwarded";
pub const FROM: &str = "From";
pub const HOST: &str = "Host";
pub const IF_MATCH: &str = "If-Match";
pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const IF_RANGE: &str = "If-Range";
pub const IF_UNMODIFIED_SINCE: &str = "If-Unmodified-Since";
pub const MAX_FORWARDS: &str = "Max-Forwards";
pub const ORIGIN: &str = "Origin";
pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
pub const RANGE: &str = "Range";
pub const REFERER: &str = "Referer";
pub const REFERRER: &str = REFERER;
pub const TE: &str = "TE";
pub const USER_AGENT: &str = "User-Agent";

// Response header fields
pub const ACCESS_CONTROL_ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";
pub const ACCESS_CONTROL_ALLOW_CREDENTIALS: &str = "Access-Control-Allow-Credentials";
pub const ACCESS_CONTROL_EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";
pub const ACCESS_CONTROL_MAX_AGE: &str = "Access-Control-Max-Age";
pub const ACCESS_CONTROL_ALLOW_METHODS: &str = "Access-Control-Allow-Methods";
pub const ACCESS_CONTROL_ALLOW_HEADERS: &str = "Access-Control-Allow-Headers";
pub const ACCEPT_PATCH: &str = "Accept-Patch";
pub const ACCEPT_RANGES: &str = "Accept-Ranges";
pub const AGE: &str = "Age";
pub const ALLOW: &str = "Allow";
pub const ALT_SVC: &str = "Alt-Svc";
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
pub const CONTENT_ENCODING: &str = "Content-Encoding";
pub const CONTENT_LANGUAGE: &str = "Content-Language";
pub const CONTENT_LOCATION: &str = "Content-Location";
pub const CONTENT_RANGE: &str = "Content-Range";
pub const DELTA_BASE: &str = "Delta-Base";
pub const ETAG: &str = "ETag";
pub const EXPIRES: &str = "Expires";
pub const IM: &str = "IM";
pub const LAST_MODIFIED: &str = "Last-Modified";
pub const LINK: &str = "Link";
pub const LOCATION: &str = "Location";
pub const P3P: &str = "P3P";
pub const PROXY_AUTHENTICATE: &str = "Proxy-Authenticate";
pub const PUBLIC_KEY_PINS: &str = "Public-Key-Pins";
pub const RETRY_AFTER: &str = "Retry-After";
pub const SERVER: &str = "Server";
pub const SET_COOKIE: &str = "Set-Cookie";
pub const STRICT_TRANSPORT_SECURITY: &str = "Strict-Transport-Security";
pub const TRAILER: &str = "Trailer";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const TK: &str = "Tk";
pub const VARY: &str = "Vary";
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
pub const X_FRAME_OPTIONS: &str = "X-Frame-Options";

/// Header fields in the order they were received or added.
///
/// Lookups ignore ASCII case; names keep the spelling they were inserted with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces every value of `name`, keeping the position of the first one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(index) => {
                self.entries[index] = (name.clone(), value);
                let mut seen = 0usize;
                self.entries.retain(|(n, _)| {
                    if n.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parsed `Content-Length`. Repeated fields must agree.
    pub fn content_length(&self) -> Result<Option<u64>> {
        let mut length = None;
        for value in self.get_all(CONTENT_LENGTH) {
            for part in value.split(',') {
                let part = part.trim();
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(HttpError::malformed(format!(
                        "invalid Content-Length: {}",
                        value
                    )));
                }
                let parsed: u64 = part.parse().map_err(|_| {
                    HttpError::malformed(format!("invalid Content-Length: {}", value))
                })?;
                match length {
                    Some(existing) if existing != parsed => {
                        return Err(HttpError::malformed("conflicting Content-Length values"));
                    }
                    _ => length = Some(parsed),
                }
            }
        }
        Ok(length)
    }

    /// True when the last transfer coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.get_all(TRANSFER_ENCODING)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .last()
            .map(|c| c.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// RFC 7230 `tchar`.
pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let headers: Headers = [("Content-Type", "text/plain"), ("X-Trace", "1")]
            .into_iter()
            .collect();
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert!(headers.contains("x-trace"));
        assert!(!headers.contains("Host"));
    }

    #[test]
    fn test_insert_replaces_all_values_in_place() {
        let mut headers: Headers = [("A", "1"), ("Set-Cookie", "a"), ("B", "2"), ("set-cookie", "b")]
            .into_iter()
            .collect();
        headers.insert("Set-Cookie", "c");
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["A", "Set-Cookie", "B"]);
        assert_eq!(headers.get("set-cookie"), Some("c"));
    }

    #[test]
    fn test_append_keeps_duplicates() {
        let mut headers = Headers::new();
        headers.append(SET_COOKIE, "a=1");
        headers.append(SET_COOKIE, "b=2");
        assert_eq!(headers.get_all("set-cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
        assert!(headers.remove("Set-Cookie"));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_content_length() {
        let headers: Headers = [(CONTENT_LENGTH, "42")].into_iter().collect();
        assert_eq!(headers.content_length().unwrap(), Some(42));

        let same: Headers = [(CONTENT_LENGTH, "5"), (CONTENT_LENGTH, "5")].into_iter().collect();
        assert_eq!(same.content_length().unwrap(), Some(5));

        let conflicting: Headers = [(CONTENT_LENGTH, "5, 6")].into_iter().collect();
        assert!(conflicting.content_length().is_err());

        let signed: Headers = [(CONTENT_LENGTH, "-1")].into_iter().collect();
        assert!(signed.content_length().is_err());

        assert_eq!(Headers::new().content_length().unwrap(), None);
    }

    #[test]
    fn test_chunked_detection() {
        let headers: Headers = [(TRANSFER_ENCODING, "gzip, chunked")].into_iter().collect();
        assert!(headers.is_chunked());
        let not_last: Headers = [(TRANSFER_ENCODING, "chunked, gzip")].into_iter().collect();
        assert!(!not_last.is_chunked());
    }

    #[test]
    fn test_token() {
        assert!(is_token("GET"));
        assert!(is_token("X-Custom_Header"));
        assert!(!is_token("Bad Header"));
        assert!(!is_token(""));
    }

    #[test]
    fn test_referrer_alias() {
        assert_eq!(REFERRER, "Referer");
        assert_eq!(PROXY_AUTHENTICATE, "Proxy-Authenticate");
    }
}
