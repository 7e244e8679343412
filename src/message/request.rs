use bytes::Bytes;

use crate::message::headers::Headers;
use crate::url::Url;

/// An outbound HTTP request.
///
/// Mirrors the shape the protocol engine needs to write a request line plus
/// headers plus an optional body; redirect-following is expressed by
/// `redirected_from` pointing back at the request that produced the 3xx.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub close_connection: bool,
    pub redirected_from: Option<Box<Request>>,
}

impl Request {
    pub fn new(url: Url, method: impl Into<String>) -> Self {
        Self {
            url,
            method: method.into(),
            headers: Headers::new(),
            body: None,
            close_connection: false,
            redirected_from: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(url, "GET")
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Fills in `Content-Length`, `Host`, and (if requested) `Connection:
    /// close` the way the wire expects, without clobbering anything the
    /// caller already set explicitly.
    pub fn prepare_headers(&mut self) {
        if let Some(body) = &self.body {
            self.headers.set("Content-Length", body.len().to_string());
        }
        self.headers.set_default("Host", self.url.host.clone());
        if self.close_connection {
            self.headers.set_default("Connection", "close");
        }
    }

    /// Builds the request that follows a redirect to `location`, carrying
    /// the method/headers/body forward and recording the chain via
    /// `redirected_from`.
    pub fn redirect(&self, location: &str) -> Result<Request, crate::url::UrlError> {
        let new_url = self.url.click(location)?;
        Ok(Request {
            url: new_url,
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            close_connection: self.close_connection,
            redirected_from: Some(Box::new(self.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_headers_sets_content_length() {
        let url = Url::parse("http://example.com/x").unwrap();
        let mut req = Request::get(url).with_body(Bytes::from_static(b"hello"));
        req.prepare_headers();
        assert_eq!(req.headers.get("Content-Length"), Some("5"));
        assert_eq!(req.headers.get("Host"), Some("example.com"));
    }

    #[test]
    fn redirect_preserves_method_and_tracks_chain() {
        let url = Url::parse("http://example.com/a").unwrap();
        let req = Request::new(url, "POST").with_body(Bytes::from_static(b"data"));
        let next = req.redirect("/b").unwrap();
        assert_eq!(next.method, "POST");
        assert_eq!(next.url.path, "/b");
        assert!(next.redirected_from.is_some());
    }
}
