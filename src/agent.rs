use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;

use crate::auth::{Authenticator, Challenge};
use crate::config::{AgentConfig, SocksVersionConfig};
use crate::cookie::{CookieStore, MemoryCookieStore};
use crate::error::AgentError;
use crate::message::{Request, Response};
use crate::multiplexer::Multiplexer;
use crate::protocol::{self, Classification};
use crate::requester::{BoxFuture, Connector, Transport};
use crate::resolver::{Resolver, SystemResolver};
use crate::socks::{self, SocksVersion};

/// A rustls `ServerCertVerifier` that accepts any certificate without
/// validation. Used when `tls.verify_certificates` is `false` — development
/// endpoints and self-signed test fixtures are the common case.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn build_tls_config(verify_certificates: bool) -> ClientConfig {
    if verify_certificates {
        let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    }
}

/// An origin in the multiplexer LRU, ordered most-recently-used first.
struct CachedMultiplexer {
    key: String,
    multiplexer: Arc<Multiplexer>,
}

/// The user-facing entry point: resolves, dials (optionally through a SOCKS
/// proxy and/or TLS), pipelines requests over a capped pool of connections
/// per origin, and drives the redirect/authentication/retry control loop
/// that turns a raw `Response` into whatever the caller actually asked for.
///
/// One `Agent` is meant to be built once and shared (`Arc`) across many
/// concurrent `open()` calls — it owns no per-request state beyond the
/// connection pool and the authorization/cookie caches.
pub struct Agent {
    config: AgentConfig,
    cookie_store: Arc<dyn CookieStore>,
    resolver: Arc<dyn Resolver>,
    authenticators: Vec<Arc<dyn Authenticator>>,
    tls_connector: TlsConnector,

    multiplexers: Mutex<Vec<CachedMultiplexer>>,
    authorization_cache: Mutex<HashMap<String, String>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self::with_collaborators(config, Arc::new(MemoryCookieStore::new()), Arc::new(SystemResolver), Vec::new())
    }

    pub fn with_collaborators(
        config: AgentConfig,
        cookie_store: Arc<dyn CookieStore>,
        resolver: Arc<dyn Resolver>,
        authenticators: Vec<Arc<dyn Authenticator>>,
    ) -> Self {
        let tls_config = build_tls_config(config.tls.verify_certificates);
        Self {
            config,
            cookie_store,
            resolver,
            authenticators,
            tls_connector: TlsConnector::from(Arc::new(tls_config)),
            multiplexers: Mutex::new(Vec::new()),
            authorization_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Issues `request`, following redirects and answering authentication
    /// challenges up to `config.max_redirects` of each before giving up and
    /// surfacing the classification as an error. `503`s are not retried
    /// autonomously — `Retry` is surfaced to the caller immediately so it
    /// can honor `retry-after` on its own terms.
    pub async fn open(&self, request: Request) -> Result<Response, AgentError> {
        let mut current = request;
        let mut redirect_count = 0u32;
        let mut unauth_count = 0u32;

        loop {
            let mut outgoing = current.clone();
            self.build_request(&mut outgoing);

            if let Some(header) = self.cached_authorization(&outgoing.url.authority()) {
                outgoing.headers.set_default("Authorization", header);
            }

            let multiplexer = self.get_multiplexer(&outgoing).await?;
            let response = multiplexer.issue(outgoing).await?;

            match protocol::classify(response.status) {
                Classification::Okay => {
                    response.verify_digest()?;
                    self.cookie_store.extract_cookies(&response);
                    return Ok(response);
                }
                Classification::Redirect => {
                    self.cookie_store.extract_cookies(&response);
                    let location = response
                        .headers
                        .get("location")
                        .map(str::to_string)
                        .ok_or_else(|| AgentError::WebError {
                            status: response.status,
                            message: "redirect response missing Location header".into(),
                        })?;

                    // 303 See Other tells the caller to re-fetch elsewhere,
                    // typically with a changed method (POST -> GET) — the
                    // Agent surfaces it rather than guessing at that change.
                    if response.status == 303
                        || !self.config.follow_redirect
                        || redirect_count >= self.config.max_redirects
                    {
                        tracing::debug!(
                            "agent: surfacing {} redirect to {} instead of following",
                            response.status,
                            location
                        );
                        return Err(AgentError::Redirected {
                            status: response.status,
                            location,
                        });
                    }
                    tracing::debug!("agent: following {} redirect to {}", response.status, location);
                    current = current.redirect(&location)?;
                    redirect_count += 1;
                }
                Classification::Retry => {
                    let retry_after = response
                        .headers
                        .get("retry-after")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    tracing::warn!(
                        "agent: surfacing {} retry (retry-after={}s) to caller",
                        response.status,
                        retry_after
                    );
                    return Err(AgentError::Retry {
                        status: response.status,
                        retry_after,
                    });
                }
                Classification::Unauthorized => {
                    let challenges: Vec<Challenge> = response
                        .headers
                        .get_all("www-authenticate")
                        .filter_map(Challenge::parse)
                        .collect();

                    if unauth_count >= self.config.max_redirects {
                        tracing::warn!("agent: exhausted auth challenge budget, surfacing Unauthorized");
                        return Err(AgentError::Unauthorized { challenges });
                    }

                    let secure_transport = current.url.scheme == "https";
                    let method = current.method.clone();
                    let uri = current.url.request_target();

                    match self.authorize(&challenges, &method, &uri, secure_transport)? {
                        Some(header) => {
                            self.cache_authorization(&current.url.authority(), header.clone());
                            current.headers.set("Authorization", header);
                            unauth_count += 1;
                        }
                        None => return Err(AgentError::Unauthorized { challenges }),
                    }
                }
                Classification::Error => {
                    return Err(AgentError::WebError {
                        status: response.status,
                        message: response.message.clone(),
                    });
                }
            }
        }
    }

    /// Fills in the headers a well-behaved client always sets, without
    /// clobbering ones the caller already supplied.
    fn build_request(&self, request: &mut Request) {
        request.headers.set_default("User-Agent", self.config.identifier.clone());
        request
            .headers
            .set_default("Connection", self.config.preferred_connection.clone());
        if !self.config.preferred_transfer_encodings.is_empty() {
            request
                .headers
                .set_default("TE", self.config.preferred_transfer_encodings.join(", "));
        }
        self.cookie_store.add_cookie_header(request);
        request.prepare_headers();
    }

    fn authorize(
        &self,
        challenges: &[Challenge],
        method: &str,
        uri: &str,
        secure_transport: bool,
    ) -> Result<Option<String>, AgentError> {
        for challenge in challenges {
            let Some(authenticator) = self
                .authenticators
                .iter()
                .find(|a| a.scheme().eq_ignore_ascii_case(&challenge.scheme))
            else {
                continue;
            };

            if !secure_transport && !authenticator.secure() {
                return Err(AgentError::InsecureAuthentication);
            }
            return Ok(Some(authenticator.authorize(challenge, method, uri)));
        }
        Ok(None)
    }

    fn cached_authorization(&self, authority: &str) -> Option<String> {
        self.authorization_cache
            .try_lock()
            .ok()
            .and_then(|cache| cache.get(authority).cloned())
    }

    fn cache_authorization(&self, authority: &str, header: String) {
        if let Ok(mut cache) = self.authorization_cache.try_lock() {
            cache.insert(authority.to_string(), header);
        }
    }

    /// Looks up (or builds) the `Multiplexer` for `request`'s origin,
    /// evicting the least-recently-used entry once `max_connections`
    /// distinct origins are cached — mirrors `Agent._requesterCache` /
    /// `_requesterCacheOrder` in the original.
    async fn get_multiplexer(&self, request: &Request) -> Result<Arc<Multiplexer>, AgentError> {
        let key = request.url.authority();
        let mut cache = self.multiplexers.lock().await;

        if let Some(pos) = cache.iter().position(|entry| entry.key == key) {
            let entry = cache.remove(pos);
            let multiplexer = entry.multiplexer.clone();
            cache.insert(0, entry);
            return Ok(multiplexer);
        }

        if cache.len() >= self.config.max_connections && !cache.is_empty() {
            cache.pop();
        }

        let connector = self.build_connector(&request.url.scheme, request.url.host.clone(), request.url.port);
        let connect_timeout = self.config.connect_timeout_ms.map(Duration::from_millis);
        let request_timeout = self.config.request_timeout_ms.map(Duration::from_millis);
        let multiplexer = Arc::new(
            Multiplexer::new(connector, self.config.max_connections_per_site, connect_timeout)
                .with_request_timeout(request_timeout),
        );
        cache.insert(
            0,
            CachedMultiplexer {
                key,
                multiplexer: multiplexer.clone(),
            },
        );
        Ok(multiplexer)
    }

    /// Builds the connector closure a `Requester` calls every time it needs
    /// a fresh socket for this origin: resolve, TCP connect, optionally
    /// tunnel through a SOCKS proxy, optionally wrap in TLS.
    fn build_connector(&self, scheme: &str, host: String, port: u16) -> Connector {
        let resolver = self.resolver.clone();
        let proxy = self.config.proxy.clone();
        let tls_connector = if scheme == "https" { Some(self.tls_connector.clone()) } else { None };

        Arc::new(move || -> BoxFuture<Result<Box<dyn Transport>, AgentError>> {
            let resolver = resolver.clone();
            let proxy = proxy.clone();
            let tls_connector = tls_connector.clone();
            let host = host.clone();

            Box::pin(async move {
                let transport: Box<dyn Transport> = match &proxy {
                    Some(proxy_cfg) => {
                        let proxy_ip = resolver.resolve(&proxy_cfg.host).await?;
                        let tcp = TcpStream::connect((proxy_ip, proxy_cfg.port)).await?;
                        let _ = tcp.set_nodelay(true);

                        let (socks_host, socks_version) = match proxy_cfg.socks_version {
                            SocksVersionConfig::V4 => {
                                let ip = resolver.resolve(&host).await?;
                                (ip.to_string(), SocksVersion::V4)
                            }
                            SocksVersionConfig::V4a => (host.clone(), SocksVersion::V4a),
                        };

                        let tunnel = socks::connect(tcp, socks_version, &socks_host, port, &proxy_cfg.user).await?;
                        Box::new(tunnel) as Box<dyn Transport>
                    }
                    None => {
                        let ip = resolver.resolve(&host).await?;
                        let tcp = TcpStream::connect((ip, port)).await?;
                        let _ = tcp.set_nodelay(true);
                        Box::new(tcp) as Box<dyn Transport>
                    }
                };

                match tls_connector {
                    Some(connector) => {
                        let server_name = ServerName::try_from(host.clone())
                            .map_err(|_| AgentError::Tls(format!("invalid server name: {}", host)))?;
                        let tls_stream = connector
                            .connect(server_name, transport)
                            .await
                            .map_err(|e| AgentError::Tls(e.to_string()))?;
                        Ok(Box::new(tls_stream) as Box<dyn Transport>)
                    }
                    None => Ok(transport),
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::Url;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_fixture_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {
                                let body = b"hello";
                                let wire = format!(
                                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
                                    body.len()
                                );
                                if socket.write_all(wire.as_bytes()).await.is_err() {
                                    return;
                                }
                                if socket.write_all(body).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn opens_a_plain_request_end_to_end() {
        let port = spawn_fixture_server().await;
        let agent = Agent::new(AgentConfig::default());
        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let response = agent.open(Request::get(url)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.into_body()[..], b"hello");
    }

    #[tokio::test]
    async fn reuses_the_cached_multiplexer_for_the_same_origin() {
        let port = spawn_fixture_server().await;
        let agent = Agent::new(AgentConfig::default());
        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();

        agent.open(Request::get(url.clone())).await.unwrap();
        agent.open(Request::get(url)).await.unwrap();

        assert_eq!(agent.multiplexers.lock().await.len(), 1);
    }
}
