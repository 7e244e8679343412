use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::AgentError;
use crate::message::{Request, Response};
use crate::requester::{Connector, Requester};

/// Holds up to `max_connections` [`Requester`]s for a single origin
/// (`scheme://host:port`) and dispatches each request to an idle one,
/// opening a fresh connection while under the cap and otherwise waiting for
/// one to free up.
///
/// One `Multiplexer` per origin; `Agent` keeps an LRU-capped collection of
/// them keyed by [`Url::authority`](crate::url::Url::authority).
pub struct Multiplexer {
    connector: Connector,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    max_connections: usize,
    requesters: Mutex<Vec<Arc<Requester>>>,
}

impl Multiplexer {
    pub fn new(connector: Connector, max_connections: usize, connect_timeout: Option<Duration>) -> Self {
        Self {
            connector,
            connect_timeout,
            request_timeout: None,
            max_connections,
            requesters: Mutex::new(Vec::new()),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub async fn issue(&self, request: Request) -> Result<Response, AgentError> {
        let requester = self.wait_for_available_requester().await?;
        match self.request_timeout {
            Some(d) => match tokio::time::timeout(d, requester.issue(request)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout { elapsed_ms: d.as_millis() as u64 }),
            },
            None => requester.issue(request).await,
        }
    }

    async fn wait_for_available_requester(&self) -> Result<Arc<Requester>, AgentError> {
        loop {
            let (candidate, should_wait_on) = {
                let mut requesters = self.requesters.lock().await;

                if let Some(idle) = requesters.iter().find(|r| !r.active()) {
                    (Some(idle.clone()), None)
                } else if requesters.len() < self.max_connections {
                    let requester = Arc::new(Requester::spawn(self.connector.clone(), self.connect_timeout));
                    requesters.push(requester.clone());
                    (Some(requester), None)
                } else {
                    (None, requesters.first().cloned())
                }
            };

            if let Some(requester) = candidate {
                return Ok(requester);
            }

            match should_wait_on {
                Some(requester) => requester.wait_for_availability().await,
                None => return Err(AgentError::TooManyConnections { key: String::new() }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConnectionParser;
    use crate::url::Url;
    use tokio::io::duplex;

    fn echo_connector() -> Connector {
        Arc::new(|| {
            Box::pin(async move {
                let (client, mut server) = duplex(4096);
                tokio::spawn(async move {
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};
                    let mut buf = vec![0u8; 4096];
                    loop {
                        match server.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_n) => {
                                let body = b"pong";
                                let wire = format!(
                                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                                    body.len()
                                );
                                if server.write_all(wire.as_bytes()).await.is_err() {
                                    break;
                                }
                                if server.write_all(body).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
                Ok(Box::new(client) as Box<dyn crate::requester::Transport>)
            })
        })
    }

    #[tokio::test]
    async fn issues_request_over_fresh_connection() {
        let _ = ConnectionParser::new(Request::get(Url::parse("http://example.com/").unwrap()));
        let mux = Multiplexer::new(echo_connector(), 2, None);
        let req = Request::get(Url::parse("http://example.com/").unwrap());
        let resp = mux.issue(req).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn reuses_idle_requesters_within_cap() {
        let mux = Multiplexer::new(echo_connector(), 1, None);
        for _ in 0..3 {
            let req = Request::get(Url::parse("http://example.com/").unwrap());
            let resp = mux.issue(req).await.unwrap();
            assert_eq!(resp.status, 200);
        }
        assert_eq!(mux.requesters.lock().await.len(), 1);
    }
}
