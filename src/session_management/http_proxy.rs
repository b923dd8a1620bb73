//! HTTP-aware proxy.
//!
//! Reads one request from the attacker, forwards it verbatim, records it,
//! then forwards the matching response before reading the next request.
//! Heads are parsed with `httparse`; bodies are streamed according to their
//! framing (content length, chunked, or until end-of-stream).

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, trace};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::error_handling::types::ProxyError;
use crate::event::types::{
    Event, EventValue, DATA_REQUEST, FIELD_CATEGORY, FIELD_CONTAINER, FIELD_SESSION, FIELD_SOURCE,
    SENSOR_DATA,
};
use crate::event::Channel;
use crate::session_management::relay::TrafficCounters;

const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_LINE_BYTES: u64 = 8 * 1024;
const MAX_HEADERS: usize = 100;
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// How the end of a message body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(u64),
    Chunked,
    UntilEof,
}

#[derive(Debug)]
struct RequestHead {
    method: String,
    url: String,
    headers: BTreeMap<String, Vec<String>>,
    framing: Framing,
    close: bool,
}

#[derive(Debug)]
struct ResponseHead {
    status: u16,
    framing: Framing,
    close: bool,
}

/// Bytes moved for one body: on the wire, and as payload once chunk
/// framing is removed.
#[derive(Debug, Default, Clone, Copy)]
struct Forwarded {
    wire: u64,
    payload: u64,
}

/// Everything recorded about one forwarded request.
#[derive(Debug, Clone)]
pub struct HttpRequestRecord {
    pub date: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub host: Option<String>,
    pub remote_addr: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub content_length: u64,
    /// Body as forwarded, truncated to the capture limit.
    pub body: Vec<u8>,
}

impl HttpRequestRecord {
    pub fn into_event(self, container: &str, session_id: Uuid) -> Event {
        Event::builder(SENSOR_DATA, DATA_REQUEST)
            .with(FIELD_CATEGORY, "http")
            .with(FIELD_CONTAINER, container)
            .with(FIELD_SESSION, session_id)
            .with(FIELD_SOURCE, self.remote_addr)
            .with("http.date", self.date)
            .with("http.method", self.method)
            .with("http.url", self.url)
            .with_opt("http.host", self.host)
            .with_opt("http.user-agent", self.user_agent)
            .with_opt("http.referer", self.referer)
            .with("http.headers", EventValue::Headers(self.headers))
            .with("http.content-length", self.content_length)
            .with("http.body", self.body)
            .build()
    }
}

/// Strictly alternating request/response relay for one session.
pub struct HttpProxy {
    session_id: Uuid,
    container: String,
    remote_addr: String,
    channel: Arc<dyn Channel>,
    counters: Arc<TrafficCounters>,
}

impl HttpProxy {
    pub fn new(
        session_id: Uuid,
        container: &str,
        remote_addr: &str,
        channel: Arc<dyn Channel>,
        counters: Arc<TrafficCounters>,
    ) -> Self {
        HttpProxy {
            session_id,
            container: container.to_string(),
            remote_addr: remote_addr.to_string(),
            channel,
            counters,
        }
    }

    /// Runs exchanges until either side closes between messages.
    ///
    /// Request N+1 is not read before response N has been fully forwarded.
    /// One event is emitted per request, after it was forwarded whole.
    pub async fn run<A, B>(&self, attacker: A, backend: B) -> Result<(), ProxyError>
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let mut attacker = BufReader::new(attacker);
        let mut backend = BufReader::new(backend);

        loop {
            let Some(raw) = read_head(&mut attacker).await? else {
                debug!("[{}] attacker closed the connection", self.session_id);
                return Ok(());
            };
            let request = parse_request(&raw)?;
            let date = Utc::now();
            trace!("[{}] {} {}", self.session_id, request.method, request.url);

            backend.write_all(&raw).await?;
            let mut body = Vec::new();
            let sent = forward_body(
                &mut attacker,
                &mut backend,
                request.framing,
                &mut body,
                MAX_CAPTURE_BYTES,
            )
            .await?;
            backend.flush().await?;
            self.counters
                .attacker_to_backend
                .fetch_add(raw.len() as u64 + sent.wire, Ordering::Relaxed);

            let head_only = request.method.eq_ignore_ascii_case("HEAD");
            let request_close = request.close;
            let record = HttpRequestRecord {
                date,
                host: first_header(&request.headers, "host"),
                user_agent: first_header(&request.headers, "user-agent"),
                referer: first_header(&request.headers, "referer"),
                remote_addr: self.remote_addr.clone(),
                content_length: sent.payload,
                method: request.method,
                url: request.url,
                headers: request.headers,
                body,
            };
            self.channel.send(record.into_event(&self.container, self.session_id));

            // Interim 1xx responses precede the final one.
            let response = loop {
                let Some(raw) = read_head(&mut backend).await? else {
                    debug!("[{}] backend closed before responding", self.session_id);
                    return Ok(());
                };
                let response = parse_response(&raw, head_only)?;
                attacker.write_all(&raw).await?;
                let sent = forward_body(&mut backend, &mut attacker, response.framing, &mut Vec::new(), 0).await?;
                attacker.flush().await?;
                self.counters
                    .backend_to_attacker
                    .fetch_add(raw.len() as u64 + sent.wire, Ordering::Relaxed);

                if response.status == 101 || !(100..200).contains(&response.status) {
                    break response;
                }
            };

            if response.status == 101 {
                debug!("[{}] protocol switched, relaying raw bytes", self.session_id);
                let (up, down) = tokio::io::copy_bidirectional(&mut attacker, &mut backend).await?;
                self.counters.attacker_to_backend.fetch_add(up, Ordering::Relaxed);
                self.counters.backend_to_attacker.fetch_add(down, Ordering::Relaxed);
                return Ok(());
            }

            self.counters.exchanges.fetch_add(1, Ordering::Relaxed);
            if request_close || response.close || response.framing == Framing::UntilEof {
                debug!("[{}] connection not kept alive", self.session_id);
                return Ok(());
            }
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

/// Reads one line including its terminator. An empty vector means EOF.
async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', &mut line).await?;
    if n > 0 && !line.ends_with(b"\n") {
        if n as u64 == MAX_LINE_BYTES {
            return Err(ProxyError::Malformed("line too long".to_string()));
        }
        return Err(ProxyError::Malformed("truncated line".to_string()));
    }
    Ok(line)
}

/// Reads a message head up to and including the blank line.
///
/// Returns `None` on EOF before any byte of the head.
async fn read_head<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(ProxyError::Malformed("truncated message head".to_string()));
        }
        if head.is_empty() && is_blank(&line) {
            continue;
        }
        head.extend_from_slice(&line);
        if is_blank(&line) {
            return Ok(Some(head));
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(ProxyError::Malformed("message head too large".to_string()));
        }
    }
}

fn collect_headers(headers: &[httparse::Header<'_>]) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for h in headers {
        map.entry(h.name.to_ascii_lowercase())
            .or_default()
            .push(String::from_utf8_lossy(h.value).trim().to_string());
    }
    map
}

fn first_header(headers: &BTreeMap<String, Vec<String>>, name: &str) -> Option<String> {
    headers.get(name).and_then(|values| values.first()).cloned()
}

fn has_token(headers: &BTreeMap<String, Vec<String>>, name: &str, token: &str) -> bool {
    headers
        .get(name)
        .map(|values| {
            values
                .iter()
                .flat_map(|v| v.split(','))
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
        .unwrap_or(false)
}

fn wants_close(headers: &BTreeMap<String, Vec<String>>, version: Option<u8>) -> bool {
    if has_token(headers, "connection", "close") {
        return true;
    }
    version == Some(0) && !has_token(headers, "connection", "keep-alive")
}

/// Body framing from the headers; `fallback` applies when neither
/// Transfer-Encoding nor Content-Length is present.
fn framing(headers: &BTreeMap<String, Vec<String>>, fallback: Framing) -> Result<Framing, ProxyError> {
    if has_token(headers, "transfer-encoding", "chunked") {
        return Ok(Framing::Chunked);
    }
    match first_header(headers, "content-length") {
        Some(value) => value
            .parse::<u64>()
            .map(Framing::Length)
            .map_err(|_| ProxyError::Malformed(format!("bad content-length {:?}", value))),
        None => Ok(fallback),
    }
}

fn parse_request(raw: &[u8]) -> Result<RequestHead, ProxyError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(ProxyError::Malformed("incomplete request head".to_string()))
        }
        Err(e) => return Err(ProxyError::Malformed(format!("bad request head: {}", e))),
    }

    let headers = collect_headers(req.headers);
    Ok(RequestHead {
        method: req.method.unwrap_or_default().to_string(),
        url: req.path.unwrap_or_default().to_string(),
        framing: framing(&headers, Framing::Length(0))?,
        close: wants_close(&headers, req.version),
        headers,
    })
}

fn parse_response(raw: &[u8], head_only: bool) -> Result<ResponseHead, ProxyError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    match resp.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(ProxyError::Malformed("incomplete response head".to_string()))
        }
        Err(e) => return Err(ProxyError::Malformed(format!("bad response head: {}", e))),
    }

    let status = resp.code.unwrap_or_default();
    let headers = collect_headers(resp.headers);
    let bodiless = head_only || (100..200).contains(&status) || status == 204 || status == 304;
    Ok(ResponseHead {
        status,
        framing: if bodiless {
            Framing::Length(0)
        } else {
            framing(&headers, Framing::UntilEof)?
        },
        close: wants_close(&headers, resp.version),
    })
}

fn tee(capture: &mut Vec<u8>, limit: usize, data: &[u8]) {
    let room = limit.saturating_sub(capture.len());
    capture.extend_from_slice(&data[..data.len().min(room)]);
}

async fn copy_exact<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut remaining: u64,
    capture: &mut Vec<u8>,
    limit: usize,
) -> Result<u64, ProxyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let total = remaining;
    while remaining > 0 {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Err(ProxyError::Malformed("body ended early".to_string()));
        }
        let take = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        writer.write_all(&buf[..take]).await?;
        tee(capture, limit, &buf[..take]);
        reader.consume(take);
        remaining -= take as u64;
    }
    Ok(total)
}

async fn forward_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    framing: Framing,
    capture: &mut Vec<u8>,
    limit: usize,
) -> Result<Forwarded, ProxyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::Length(n) => {
            let n = copy_exact(reader, writer, n, capture, limit).await?;
            Ok(Forwarded { wire: n, payload: n })
        }
        Framing::UntilEof => {
            let mut total = 0u64;
            loop {
                let buf = reader.fill_buf().await?;
                if buf.is_empty() {
                    return Ok(Forwarded {
                        wire: total,
                        payload: total,
                    });
                }
                let n = buf.len();
                writer.write_all(buf).await?;
                tee(capture, limit, buf);
                reader.consume(n);
                total += n as u64;
            }
        }
        Framing::Chunked => {
            let mut sent = Forwarded::default();
            loop {
                let line = read_line(reader).await?;
                if line.is_empty() {
                    return Err(ProxyError::Malformed("chunked body ended early".to_string()));
                }
                writer.write_all(&line).await?;
                sent.wire += line.len() as u64;

                let text = String::from_utf8_lossy(&line);
                let size_field = text.split(';').next().unwrap_or_default().trim();
                let size = u64::from_str_radix(size_field, 16)
                    .map_err(|_| ProxyError::Malformed(format!("bad chunk size {:?}", size_field)))?;

                if size == 0 {
                    // Trailer section, terminated by a blank line.
                    loop {
                        let line = read_line(reader).await?;
                        if line.is_empty() {
                            return Err(ProxyError::Malformed("chunked trailer ended early".to_string()));
                        }
                        writer.write_all(&line).await?;
                        sent.wire += line.len() as u64;
                        if is_blank(&line) {
                            return Ok(sent);
                        }
                    }
                }

                let n = copy_exact(reader, writer, size, capture, limit).await?;
                sent.wire += n;
                sent.payload += n;

                let end = read_line(reader).await?;
                if !is_blank(&end) {
                    return Err(ProxyError::Malformed("missing chunk terminator".to_string()));
                }
                writer.write_all(&end).await?;
                sent.wire += end.len() as u64;
            }
        }
    }
}
