use std::sync::Mutex;

use crate::message::{Request, Response};

/// Cookie storage seam, mirroring `cookielib.CookieJar`'s two operations:
/// attach cookies to an outgoing request, and learn new ones from a
/// response. A trait rather than an enum since callers may want their own
/// persistence (disk-backed, shared across agents, ...).
pub trait CookieStore: Send + Sync {
    fn add_cookie_header(&self, request: &mut Request);
    fn extract_cookies(&self, response: &Response);
}

#[derive(Debug, Clone)]
struct StoredCookie {
    domain: String,
    name: String,
    value: String,
}

/// An in-memory jar with simple suffix-match domain scoping. No
/// expiration, no path scoping, no secure/httponly flags — just enough to
/// round-trip a session cookie across redirects and requests to the same
/// site.
#[derive(Default)]
pub struct MemoryCookieStore {
    cookies: Mutex<Vec<StoredCookie>>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self {
            cookies: Mutex::new(Vec::new()),
        }
    }
}

impl CookieStore for MemoryCookieStore {
    fn add_cookie_header(&self, request: &mut Request) {
        let cookies = self.cookies.lock().unwrap();
        let matching: Vec<String> = cookies
            .iter()
            .filter(|c| request.url.host.ends_with(&c.domain))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if !matching.is_empty() {
            request.headers.set("Cookie", matching.join("; "));
        }
    }

    fn extract_cookies(&self, response: &Response) {
        let mut cookies = self.cookies.lock().unwrap();
        for raw in response.headers.get_all("set-cookie") {
            let pair = raw.split_once(';').map(|(p, _)| p).unwrap_or(raw);
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            let domain = response.request.url.host.clone();
            cookies.retain(|c| !(c.domain == domain && c.name == name));
            cookies.push(StoredCookie {
                domain,
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::Url;

    #[test]
    fn extracts_and_replays_cookie() {
        let store = MemoryCookieStore::new();
        let req = Request::get(Url::parse("http://example.com/").unwrap());
        let mut resp = Response::new(req);
        resp.got_header("Set-Cookie", "session=abc123; Path=/");
        store.extract_cookies(&resp);

        let mut next = Request::get(Url::parse("http://example.com/other").unwrap());
        store.add_cookie_header(&mut next);
        assert_eq!(next.headers.get("Cookie"), Some("session=abc123"));
    }

    #[test]
    fn does_not_leak_cookies_to_other_domains() {
        let store = MemoryCookieStore::new();
        let req = Request::get(Url::parse("http://example.com/").unwrap());
        let mut resp = Response::new(req);
        resp.got_header("Set-Cookie", "session=abc123");
        store.extract_cookies(&resp);

        let mut next = Request::get(Url::parse("http://other.com/").unwrap());
        store.add_cookie_header(&mut next);
        assert_eq!(next.headers.get("Cookie"), None);
    }
}
