//! HTTP/1.1 transport on top of hyper.
//!
//! hyper owns the wire: request-head parsing, body framing and response
//! encoding. [`serve_connection`] bridges one hyper connection to a
//! [`RequestHandler`] through an [`HttpConnection`], which exposes the
//! request as a [`Transport`]:
//! - Body reads pull frames from hyper with a per-read timeout
//! - Fixed responses go out as one full body
//! - Chunked responses are fed through a small channel-backed body
//!
//! One request is served per connection and every response carries
//! `Connection: close`.

use std::convert::Infallible;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{request, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body::{Body, Frame};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming as RequestBody;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{Method, RecvError, RequestHandler, Transport};
use crate::response::{apply_cors, send_error, GatewayError};

/// Maximum size of a request head.
pub const MAX_HEAD_LEN: usize = 8 * 1024;

/// Chunks queued between the handler and hyper during a download.
const CHUNK_QUEUE: usize = 2;

/// Body type of every response.
pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

enum BodyEvent {
    Data(Bytes),
    End,
}

/// Response body fed chunk by chunk by the handler.
///
/// If the sending side goes away without [`BodyEvent::End`] the body fails,
/// so hyper aborts the connection and leaves the chunked body unterminated.
struct ChannelBody {
    rx: mpsc::Receiver<BodyEvent>,
    ended: bool,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        if self.ended {
            return Poll::Ready(None);
        }
        match ready!(self.rx.poll_recv(cx)) {
            Some(BodyEvent::Data(data)) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Some(BodyEvent::End) => {
                self.ended = true;
                Poll::Ready(None)
            }
            None => {
                self.ended = true;
                Poll::Ready(Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "response body cut short",
                ))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.ended
    }
}

fn full_body(data: Bytes) -> ResponseBody {
    Full::new(data).map_err(|never| match never {}).boxed_unsync()
}

fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(Empty::new().map_err(|never| match never {}).boxed_unsync());
    *response.status_mut() = status;
    response
}

fn connection_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
}

/// Classify a failed body read.
fn body_error(error: hyper::Error) -> RecvError {
    if error.is_incomplete_message() || error.is_closed() || error.is_canceled() {
        return RecvError::Closed;
    }
    let source = std::error::Error::source(&error).and_then(|s| s.downcast_ref::<io::Error>());
    match source.map(io::Error::kind) {
        Some(io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset) => RecvError::Closed,
        _ => RecvError::Io(io::Error::other(error)),
    }
}

/// One HTTP exchange handed over by hyper.
pub struct HttpConnection {
    parts: request::Parts,
    body: RequestBody,
    /// Part of the last body frame not yet handed out.
    pending: Bytes,
    content_length: u64,
    read_timeout: Duration,
    local_ip: Option<IpAddr>,
    status: StatusCode,
    headers: HeaderMap,
    responder: Option<oneshot::Sender<Response<ResponseBody>>>,
    chunks: Option<mpsc::Sender<BodyEvent>>,
    finished: bool,
}

impl HttpConnection {
    fn new(
        request: Request<RequestBody>,
        responder: oneshot::Sender<Response<ResponseBody>>,
        read_timeout: Duration,
    ) -> Self {
        let (parts, body) = request.into_parts();
        let content_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Self {
            parts,
            body,
            pending: Bytes::new(),
            content_length,
            read_timeout,
            local_ip: None,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            responder: Some(responder),
            chunks: None,
            finished: false,
        }
    }

    fn with_local_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.local_ip = ip;
        self
    }

    /// Request `Transfer-Encoding` other than `identity`, if any.
    ///
    /// Bodies must be framed by `Content-Length`, since handlers size their
    /// reads from it.
    pub fn unsupported_encoding(&self) -> Option<String> {
        self.parts
            .headers
            .get(TRANSFER_ENCODING)
            .filter(|v| !v.as_bytes().eq_ignore_ascii_case(b"identity"))
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
    }

    /// Complete the exchange.
    ///
    /// Sends an empty response if the handler sent nothing. A chunked
    /// response that was not ended is cut off.
    pub fn finish(&mut self) {
        if self.responder.is_some() {
            if let Err(e) = self.start_response(full_body(Bytes::new())) {
                debug!(error = %e, "Failed to send empty response");
            }
        }
        self.finished = true;
        self.chunks = None;
    }

    fn start_response(&mut self, body: ResponseBody) -> io::Result<()> {
        let responder = self
            .responder
            .take()
            .ok_or_else(|| io::Error::other("response already started"))?;

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        responder.send(response).map_err(|_| connection_closed())
    }
}

impl Transport for HttpConnection {
    fn method(&self) -> Method {
        Method::parse(self.parts.method.as_str())
    }

    fn path(&self) -> &str {
        self.parts.uri.path()
    }

    fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name)?.to_str().ok()
    }

    fn content_length(&self) -> u64 {
        self.content_length
    }

    fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, RecvError> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pending.is_empty() {
            let frame = match timeout(self.read_timeout, self.body.frame()).await {
                Err(_) => return Err(RecvError::Timeout),
                Ok(None) => return Ok(0),
                Ok(Some(Err(e))) => return Err(body_error(e)),
                Ok(Some(Ok(frame))) => frame,
            };
            // Trailers carry nothing for us
            if let Ok(data) = frame.into_data() {
                self.pending = data;
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }

    fn set_status(&mut self, status: u16) {
        self.status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(name = %name, value = ?value, "Dropping invalid response header"),
        }
    }

    async fn send(&mut self, body: &[u8]) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::other("response already complete"));
        }
        self.start_response(full_body(Bytes::copy_from_slice(body)))?;
        self.finished = true;
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::other("response already complete"));
        }

        let chunks = match self.chunks.take() {
            Some(chunks) => chunks,
            None => {
                let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
                self.start_response(ChannelBody { rx, ended: false }.boxed_unsync())?;
                tx
            }
        };

        if chunk.is_empty() {
            self.finished = true;
            return chunks
                .send(BodyEvent::End)
                .await
                .map_err(|_| connection_closed());
        }

        chunks
            .send(BodyEvent::Data(Bytes::copy_from_slice(chunk)))
            .await
            .map_err(|_| connection_closed())?;
        self.chunks = Some(chunks);
        Ok(())
    }
}

/// Serve a single request on `io` with `handler`.
///
/// hyper answers requests it cannot parse by itself (400, or 431 for a head
/// over [`MAX_HEAD_LEN`]); those never reach the handler. The returned error
/// describes how the connection ended, not a response sent to the client.
pub async fn serve_connection<I, H>(
    io: I,
    handler: &mut H,
    read_timeout: Duration,
    local_ip: Option<IpAddr>,
) -> Result<(), hyper::Error>
where
    I: AsyncRead + AsyncWrite + Unpin,
    H: RequestHandler,
{
    type Exchange = (Request<RequestBody>, oneshot::Sender<Response<ResponseBody>>);
    let (exchanges, mut incoming) = mpsc::channel::<Exchange>(1);

    let service = service_fn(move |request: Request<RequestBody>| {
        let (responder, response) = oneshot::channel();
        let queued = exchanges.try_send((request, responder)).is_ok();
        async move {
            if !queued {
                return Ok::<_, Infallible>(empty_response(StatusCode::SERVICE_UNAVAILABLE));
            }
            Ok(response
                .await
                .unwrap_or_else(|_| empty_response(StatusCode::INTERNAL_SERVER_ERROR)))
        }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(read_timeout)
        .keep_alive(false)
        .half_close(true)
        .title_case_headers(true)
        .max_buf_size(MAX_HEAD_LEN);
    let connection = builder.serve_connection(TokioIo::new(io), service);

    // The connection owns the sender, so `recv` ends once hyper gives up
    let handling = async {
        let Some((request, responder)) = incoming.recv().await else {
            return;
        };
        let mut conn = HttpConnection::new(request, responder, read_timeout).with_local_ip(local_ip);

        match conn.unsupported_encoding() {
            Some(encoding) => {
                warn!(encoding = %encoding, "Rejecting request with unsupported transfer encoding");
                apply_cors(&mut conn);
                let err = GatewayError::bad_request(format!(
                    "Unsupported transfer encoding: {}",
                    encoding
                ));
                if let Err(e) = send_error(&mut conn, &err).await {
                    debug!(error = %e, "Failed to send rejection");
                }
            }
            None => handler.respond(&mut conn).await,
        }
        conn.finish();
    };

    let (served, ()) = tokio::join!(connection, handling);
    served
}
