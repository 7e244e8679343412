use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;

use crate::error::AgentError;
use crate::message::{Request, Response};
use crate::protocol::{ConnectionParser, Outcome};

pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type Connector = Arc<dyn Fn() -> BoxFuture<Result<Box<dyn Transport>, AgentError>> + Send + Sync>;

type Job = (Request, oneshot::Sender<Result<Response, AgentError>>);

/// One persistent connection to an origin, dialed lazily and reconnected
/// once on a clean EOF if requests were still outstanding.
///
/// Requests are pipelined: the background task writes each request to the
/// socket as soon as it's dequeued, without waiting for the previous
/// response, and matches replies back up in FIFO order as they arrive.
pub struct Requester {
    tx: mpsc::Sender<Job>,
    pending: Arc<AtomicUsize>,
    availability: Arc<Notify>,
}

impl Requester {
    pub fn spawn(connector: Connector, connect_timeout: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let pending = Arc::new(AtomicUsize::new(0));
        let availability = Arc::new(Notify::new());

        tokio::spawn(run(connector, rx, pending.clone(), availability.clone(), connect_timeout));

        Self {
            tx,
            pending,
            availability,
        }
    }

    pub async fn issue(&self, request: Request) -> Result<Response, AgentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| AgentError::IncompleteResponse)?;
        reply_rx.await.map_err(|_| AgentError::IncompleteResponse)?
    }

    /// True while this requester has outstanding work — the Multiplexer
    /// uses this to decide whether a requester is free to hand to the next
    /// caller.
    pub fn active(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    /// Resolves once this requester becomes idle.
    pub async fn wait_for_availability(&self) {
        if !self.active() {
            return;
        }
        self.availability.notified().await;
    }
}

fn encode_request(request: &Request) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        format!("{} {} HTTP/1.1\r\n", request.method, request.url.request_target()).as_bytes(),
    );
    out.extend_from_slice(request.headers.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    if let Some(body) = &request.body {
        out.extend_from_slice(body);
    }
    out
}

async fn run(
    connector: Connector,
    mut rx: mpsc::Receiver<Job>,
    pending: Arc<AtomicUsize>,
    availability: Arc<Notify>,
    connect_timeout: Option<Duration>,
) {
    loop {
        let first = match rx.recv().await {
            Some(job) => job,
            None => return,
        };

        let mut backlog = VecDeque::new();
        backlog.push_back(first);

        let mut retried = false;
        loop {
            match run_connection(&connector, backlog, &mut rx, &pending, &availability, connect_timeout).await {
                ConnEnd::Done => break,
                ConnEnd::CleanCloseWithBacklog(remaining) if !retried => {
                    tracing::debug!(
                        "requester: connection closed with {} requests outstanding, reconnecting",
                        remaining.len()
                    );
                    retried = true;
                    backlog = remaining;
                    continue;
                }
                ConnEnd::CleanCloseWithBacklog(remaining) => {
                    tracing::warn!(
                        "requester: connection closed again with {} requests outstanding, giving up",
                        remaining.len()
                    );
                    fail_all(remaining, AgentError::IncompleteResponse, &pending, &availability);
                    break;
                }
                ConnEnd::Failed(remaining, err) => {
                    tracing::warn!(
                        "requester: connection failed with {} requests outstanding: {}",
                        remaining.len(),
                        err
                    );
                    fail_all(remaining, err, &pending, &availability);
                    break;
                }
            }
        }
    }
}

enum ConnEnd {
    Done,
    CleanCloseWithBacklog(VecDeque<Job>),
    Failed(VecDeque<Job>, AgentError),
}

async fn run_connection(
    connector: &Connector,
    initial: VecDeque<Job>,
    rx: &mut mpsc::Receiver<Job>,
    pending: &Arc<AtomicUsize>,
    availability: &Arc<Notify>,
    connect_timeout: Option<Duration>,
) -> ConnEnd {
    let connect_fut = connector();
    let connect_result = match connect_timeout {
        Some(d) => match timeout(d, connect_fut).await {
            Ok(r) => r,
            Err(_) => return ConnEnd::Failed(initial, AgentError::Timeout { elapsed_ms: d.as_millis() as u64 }),
        },
        None => connect_fut.await,
    };

    let mut transport = match connect_result {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!("requester: connect failed: {}", e);
            return ConnEnd::Failed(initial, e);
        }
    };

    let mut queue: VecDeque<(ConnectionParser, oneshot::Sender<Result<Response, AgentError>>)> = VecDeque::new();

    for (req, reply) in initial {
        let encoded = encode_request(&req);
        if let Err(e) = transport.write_all(&encoded).await {
            let mut remaining = VecDeque::new();
            for (p, r) in queue {
                remaining.push_back((p.into_response().request, r));
            }
            remaining.push_back((req, reply));
            return ConnEnd::Failed(remaining, e.into());
        }
        pending.fetch_add(1, Ordering::AcqRel);
        queue.push_back((ConnectionParser::new(req), reply));
    }

    let mut buf = vec![0u8; 8192];

    loop {
        if queue.is_empty() {
            // Idle: nothing in flight, so we can safely wait for the next
            // request without worrying about interleaving it with a read.
            match rx.recv().await {
                Some((req, reply)) => {
                    let encoded = encode_request(&req);
                    if let Err(e) = transport.write_all(&encoded).await {
                        let mut remaining = VecDeque::new();
                        remaining.push_back((req, reply));
                        return ConnEnd::Failed(remaining, e.into());
                    }
                    pending.fetch_add(1, Ordering::AcqRel);
                    queue.push_back((ConnectionParser::new(req), reply));
                    continue;
                }
                None => return ConnEnd::Done,
            }
        }

        tokio::select! {
            biased;

            maybe_job = rx.recv() => {
                match maybe_job {
                    Some((req, reply)) => {
                        let encoded = encode_request(&req);
                        if let Err(e) = transport.write_all(&encoded).await {
                            let mut remaining: VecDeque<Job> = queue
                                .into_iter()
                                .map(|(p, r)| (p.into_response().request, r))
                                .collect();
                            remaining.push_back((req, reply));
                            return ConnEnd::Failed(remaining, e.into());
                        }
                        pending.fetch_add(1, Ordering::AcqRel);
                        queue.push_back((ConnectionParser::new(req), reply));
                    }
                    None => {
                        // Sender side gone: finish serving what's in flight, then stop.
                    }
                }
            }

            result = transport.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        let remaining: VecDeque<Job> = queue
                            .into_iter()
                            .map(|(p, r)| (p.into_response().request, r))
                            .collect();
                        if remaining.is_empty() {
                            return ConnEnd::Done;
                        }
                        return ConnEnd::CleanCloseWithBacklog(remaining);
                    }
                    Ok(n) => {
                        if let Err(e) = drain(&mut queue, &buf[..n], pending, availability) {
                            let remaining: VecDeque<Job> = queue
                                .into_iter()
                                .map(|(p, r)| (p.into_response().request, r))
                                .collect();
                            return ConnEnd::Failed(remaining, e);
                        }
                    }
                    Err(e) => {
                        let remaining: VecDeque<Job> = queue
                            .into_iter()
                            .map(|(p, r)| (p.into_response().request, r))
                            .collect();
                        return ConnEnd::Failed(remaining, e.into());
                    }
                }
            }
        }
    }
}

/// Feeds freshly-read bytes into the parser at the front of the queue,
/// popping and replying to as many complete responses as the read
/// produced (pipelined responses can arrive back-to-back in one read).
fn drain(
    queue: &mut VecDeque<(ConnectionParser, oneshot::Sender<Result<Response, AgentError>>)>,
    input: &[u8],
    pending: &Arc<AtomicUsize>,
    availability: &Arc<Notify>,
) -> Result<(), AgentError> {
    let mut carry = input.to_vec();

    loop {
        let Some((parser, _)) = queue.front_mut() else {
            return Ok(());
        };

        let outcome = parser
            .feed(&carry)
            .map_err(|e| AgentError::WebError { status: 0, message: e.to_string() })?;

        match outcome {
            Outcome::NeedMore => return Ok(()),
            Outcome::Complete { trailing } => {
                let (parser, reply) = queue.pop_front().unwrap();
                let response = parser.into_response();
                let _ = reply.send(Ok(response));

                if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    availability.notify_waiters();
                }

                if trailing.is_empty() {
                    return Ok(());
                }
                // Pipelined bytes for the next queued response; feed them
                // through the loop again instead of waiting for the next
                // socket read.
                carry = trailing.to_vec();
                continue;
            }
        }
    }
}

fn fail_all(
    backlog: VecDeque<Job>,
    reason: AgentError,
    pending: &Arc<AtomicUsize>,
    availability: &Arc<Notify>,
) {
    for (_, reply) in backlog {
        let _ = reply.send(Err(match &reason {
            AgentError::Io(e) => AgentError::Io(std::io::Error::new(e.kind(), e.to_string())),
            AgentError::Timeout { elapsed_ms } => AgentError::Timeout { elapsed_ms: *elapsed_ms },
            _ => AgentError::IncompleteResponse,
        }));
        if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            availability.notify_waiters();
        }
    }
}
