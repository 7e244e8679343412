use std::fmt;

pub const CRLF: &str = "\r\n";

/// Parsed absolute URL. Only the pieces the engine needs to dial a
/// connection and build a request line — no userinfo, no IPv6 zone ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    Malformed(String),
    UnknownScheme(String),
}

impl fmt::Display for UrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlError::Malformed(s) => write!(f, "malformed url: {}", s),
            UrlError::UnknownScheme(s) => write!(f, "unknown scheme: {}", s),
        }
    }
}

impl std::error::Error for UrlError {}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

impl Url {
    /// Parse `scheme://host[:port][/path][?query][#fragment]`.
    pub fn parse(s: &str) -> Result<Self, UrlError> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| UrlError::Malformed(s.to_string()))?;
        let scheme = scheme.to_lowercase();

        let (authority, mut remainder) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(UrlError::Malformed(s.to_string()));
        }

        let fragment = if let Some(idx) = remainder.find('#') {
            let frag = remainder[idx + 1..].to_string();
            remainder = &remainder[..idx];
            frag
        } else {
            String::new()
        };

        let query = if let Some(idx) = remainder.find('?') {
            let q = remainder[idx + 1..].to_string();
            remainder = &remainder[..idx];
            q
        } else {
            String::new()
        };

        let path = if remainder.is_empty() {
            "/".to_string()
        } else {
            remainder.to_string()
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port_str)) if port_str.chars().all(|c| c.is_ascii_digit()) && !port_str.is_empty() => {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| UrlError::Malformed(s.to_string()))?;
                (host.to_string(), port)
            }
            _ => {
                let port = default_port(&scheme).ok_or_else(|| UrlError::UnknownScheme(scheme.clone()))?;
                (authority.to_string(), port)
            }
        };

        Ok(Url {
            scheme,
            host,
            port,
            path,
            query,
            fragment,
        })
    }

    /// `scheme://host:port` — the requester-cache / origin key.
    pub fn authority(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Path as sent on the request line, including the query string.
    pub fn request_target(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }

    /// Resolve `location` (absolute or relative) against `self`, the way a
    /// browser resolves an anchor's `href`. Normalizes `.`/`..` segments.
    pub fn click(&self, location: &str) -> Result<Url, UrlError> {
        if location.contains("://") {
            return Url::parse(location);
        }

        if let Some(rest) = location.strip_prefix("//") {
            return Url::parse(&format!("{}://{}", self.scheme, rest));
        }

        if let Some(path_and_rest) = location.strip_prefix('/') {
            let mut new = self.clone();
            apply_path_and_rest(&mut new, path_and_rest, true);
            return Ok(new);
        }

        // Relative to the current path's directory.
        let base_dir = match self.path.rfind('/') {
            Some(idx) => &self.path[..=idx],
            None => "/",
        };
        let mut new = self.clone();
        let joined = format!("{}{}", base_dir, location);
        apply_path_and_rest(&mut new, joined.trim_start_matches('/'), false);
        Ok(new)
    }
}

/// Splits off query/fragment from `rest`, normalizes the path component,
/// and writes scheme-relative-resolved fields into `new`.
fn apply_path_and_rest(new: &mut Url, rest: &str, absolute: bool) {
    let mut remainder = rest;
    let fragment = if let Some(idx) = remainder.find('#') {
        let frag = remainder[idx + 1..].to_string();
        remainder = &remainder[..idx];
        frag
    } else {
        String::new()
    };
    let query = if let Some(idx) = remainder.find('?') {
        let q = remainder[idx + 1..].to_string();
        remainder = &remainder[..idx];
        q
    } else {
        String::new()
    };

    let path = if absolute {
        format!("/{}", remainder)
    } else {
        remainder.to_string()
    };

    new.path = normalize_path(&path);
    new.query = query;
    new.fragment = fragment;
}

/// Collapses `.` and `..` segments the way `os.path.normpath` does,
/// preserving a trailing slash when the original path had one.
fn normalize_path(path: &str) -> String {
    let is_dir = path.ends_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    let mut normalized = String::from("/");
    normalized.push_str(&stack.join("/"));
    if is_dir && !normalized.ends_with('/') {
        normalized.push('/');
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

/// `humanize_bytes(1536)` -> `(1.5, "KB")`. Used only for logging.
pub fn humanize_bytes(size: u64) -> (f64, &'static str) {
    const SUFFIXES: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut idx = 0;
    while size > 1024.0 && idx < SUFFIXES.len() - 1 {
        size /= 1024.0;
        idx += 1;
    }
    (size, SUFFIXES[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_url() {
        let u = Url::parse("http://example.com/foo?bar=1#frag").unwrap();
        assert_eq!(u.scheme, "http");
        assert_eq!(u.host, "example.com");
        assert_eq!(u.port, 80);
        assert_eq!(u.path, "/foo");
        assert_eq!(u.query, "bar=1");
        assert_eq!(u.fragment, "frag");
    }

    #[test]
    fn defaults_https_port() {
        let u = Url::parse("https://example.com").unwrap();
        assert_eq!(u.port, 443);
        assert_eq!(u.path, "/");
    }

    #[test]
    fn explicit_port_wins() {
        let u = Url::parse("http://example.com:8080/x").unwrap();
        assert_eq!(u.port, 8080);
    }

    #[test]
    fn click_resolves_absolute_path() {
        let base = Url::parse("http://example.com/a/b?x=1").unwrap();
        let next = base.click("/new").unwrap();
        assert_eq!(next.path, "/new");
        assert_eq!(next.host, "example.com");
        assert_eq!(next.query, "");
    }

    #[test]
    fn click_resolves_relative_path() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        let next = base.click("c").unwrap();
        assert_eq!(next.path, "/a/c");
    }

    #[test]
    fn click_normalizes_dot_dot() {
        let base = Url::parse("http://example.com/a/b/c").unwrap();
        let next = base.click("../../x").unwrap();
        assert_eq!(next.path, "/a/x");
    }

    #[test]
    fn click_resolves_absolute_url() {
        let base = Url::parse("http://example.com/a").unwrap();
        let next = base.click("https://other.com/y").unwrap();
        assert_eq!(next.authority(), "https://other.com:443");
        assert_eq!(next.path, "/y");
    }

    #[test]
    fn authority_is_requester_key() {
        let u = Url::parse("http://example.com:8080/x").unwrap();
        assert_eq!(u.authority(), "http://example.com:8080");
    }
}
