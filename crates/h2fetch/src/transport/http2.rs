//! Production transport over the `h2` crate.
//!
//! `https` origins are dialled over TLS with ALPN `h2`; `http` origins use
//! HTTP/2 with prior knowledge. Each session spawns a driver task that owns
//! the `h2` connection. When the driver exits, its outcome is published as
//! the session's [`SessionEvent`].

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use h2::client::{ResponseFuture, SendRequest};
use h2::{Ping, PingPong, Reason, RecvStream, SendStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Notify, watch};
use tracing::{debug, trace};

use super::tls::{ALPN_H2, TlsConfig};
use super::{
    BoxFuture, Connector, RequestHead, ResponseHead, SessionEvent, TransportSession,
    TransportStream,
};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::origin::{Origin, Scheme};

/// Opens HTTP/2 sessions over TCP, with TLS for `https` origins.
#[derive(Debug, Clone)]
pub struct H2Connector {
    tls: TlsConfig,
}

impl H2Connector {
    /// Build a connector honouring `verify_certificates` from the config.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let tls = if config.verify_certificates {
            TlsConfig::with_webpki_roots()?
        } else {
            TlsConfig::dangerous_no_verify()?
        };
        Ok(Self { tls })
    }

    pub fn with_tls(tls: TlsConfig) -> Self {
        Self { tls }
    }

    async fn dial(&self, origin: &Origin) -> Result<Box<dyn TransportSession>, TransportError> {
        let tcp = TcpStream::connect((origin.hostname(), origin.port()))
            .await
            .map_err(|e| TransportError::Connect(format!("tcp connect to {origin}: {e}")))?;
        let _ = tcp.set_nodelay(true);

        match origin.scheme() {
            Scheme::Http => handshake(tcp, origin).await,
            Scheme::Https => {
                let server_name =
                    rustls::pki_types::ServerName::try_from(origin.hostname().to_string())
                        .map_err(|e| {
                            TransportError::Connect(format!(
                                "invalid tls server name '{}': {e}",
                                origin.hostname()
                            ))
                        })?;
                let connector = tokio_rustls::TlsConnector::from(Arc::clone(&self.tls.client_config));
                let tls = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| TransportError::Connect(format!("tls handshake with {origin}: {e}")))?;

                if tls.get_ref().1.alpn_protocol() != Some(ALPN_H2) {
                    return Err(TransportError::Connect(format!(
                        "{origin} did not negotiate h2 via alpn"
                    )));
                }
                handshake(tls, origin).await
            }
        }
    }
}

impl Connector for H2Connector {
    fn connect<'a>(
        &'a self,
        origin: &'a Origin,
    ) -> BoxFuture<'a, Result<Box<dyn TransportSession>, TransportError>> {
        Box::pin(self.dial(origin))
    }
}

async fn handshake<T>(io: T, origin: &Origin) -> Result<Box<dyn TransportSession>, TransportError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (send_request, mut connection) = h2::client::handshake(io)
        .await
        .map_err(|e| TransportError::Connect(format!("h2 handshake with {origin}: {e}")))?;

    let ping_pong = connection.ping_pong();
    let shutdown = Arc::new(Notify::new());
    let (events_tx, events_rx) = watch::channel(None);

    let driver_shutdown = Arc::clone(&shutdown);
    let driver_origin = origin.clone();
    tokio::spawn(async move {
        let event = tokio::select! {
            result = connection => match result {
                Ok(()) => SessionEvent::Close,
                Err(e) => classify(&e),
            },
            _ = driver_shutdown.notified() => SessionEvent::Close,
        };
        debug!(origin = %driver_origin, %event, "h2 connection driver exited");
        events_tx.send_replace(Some(event));
    });

    debug!(%origin, "h2 session established");

    Ok(Box::new(H2Session {
        scheme: origin.scheme(),
        send_request: Mutex::new(send_request),
        ping_pong: tokio::sync::Mutex::new(ping_pong),
        shutdown,
        events: events_rx,
    }))
}

/// Map a connection-level `h2` failure onto a session event.
fn classify(err: &h2::Error) -> SessionEvent {
    if err.is_go_away() && err.is_remote() {
        return SessionEvent::GoAway;
    }
    if err.is_io() {
        return SessionEvent::Error(err.to_string());
    }
    let malformed = [
        Reason::PROTOCOL_ERROR,
        Reason::FRAME_SIZE_ERROR,
        Reason::COMPRESSION_ERROR,
    ];
    match err.reason() {
        Some(reason) if malformed.contains(&reason) => SessionEvent::FrameError,
        _ => SessionEvent::Error(err.to_string()),
    }
}

struct H2Session {
    scheme: Scheme,
    send_request: Mutex<SendRequest<Bytes>>,
    ping_pong: tokio::sync::Mutex<Option<PingPong>>,
    shutdown: Arc<Notify>,
    events: watch::Receiver<Option<SessionEvent>>,
}

impl TransportSession for H2Session {
    fn open_stream(
        &self,
        head: RequestHead,
        end_of_stream: bool,
    ) -> BoxFuture<'_, Result<Box<dyn TransportStream>, TransportError>> {
        let send_request = self
            .send_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let scheme = self.scheme;

        Box::pin(async move {
            if self.is_closed() {
                return Err(TransportError::SessionClosed);
            }
            let request = build_request(head, scheme)?;
            let mut send_request = send_request.ready().await?;
            let (response, send) = send_request.send_request(request, end_of_stream)?;
            trace!(stream_id = ?send.stream_id(), end_of_stream, "h2 stream opened");

            Ok(Box::new(H2Stream {
                response: Some(response),
                send,
                recv: None,
            }) as Box<dyn TransportStream>)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let mut ping_pong = self.ping_pong.lock().await;
            let ping_pong = ping_pong
                .as_mut()
                .ok_or_else(|| TransportError::Protocol("ping handle unavailable".to_string()))?;
            ping_pong.ping(Ping::opaque()).await?;
            Ok(())
        })
    }

    fn closed(&self) -> BoxFuture<'static, SessionEvent> {
        let mut events = self.events.clone();
        Box::pin(async move {
            match events.wait_for(Option::is_some).await {
                Ok(event) => event.clone().unwrap_or(SessionEvent::Close),
                Err(_) => SessionEvent::Close,
            }
        })
    }

    fn close(&self) {
        self.shutdown.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.events.borrow().is_some()
    }
}

fn build_request(head: RequestHead, scheme: Scheme) -> Result<http::Request<()>, TransportError> {
    let method = http::Method::from_bytes(head.method.as_bytes())
        .map_err(|e| TransportError::Protocol(format!("invalid method '{}': {e}", head.method)))?;
    let uri = format!("{}://{}{}", scheme, head.authority, head.path);

    let mut builder = http::Request::builder().method(method).uri(uri);
    for (name, value) in &head.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(())
        .map_err(|e| TransportError::Protocol(format!("invalid request head: {e}")))
}

struct H2Stream {
    response: Option<ResponseFuture>,
    send: SendStream<Bytes>,
    recv: Option<RecvStream>,
}

impl TransportStream for H2Stream {
    fn write(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.send.send_data(data, false)?;
        Ok(())
    }

    fn end(&mut self) -> Result<(), TransportError> {
        self.send.send_data(Bytes::new(), true)?;
        Ok(())
    }

    fn response(&mut self) -> BoxFuture<'_, Result<ResponseHead, TransportError>> {
        Box::pin(async move {
            let pending = self
                .response
                .take()
                .ok_or_else(|| TransportError::Protocol("response already awaited".to_string()))?;
            let (parts, recv) = pending.await?.into_parts();
            self.recv = Some(recv);

            let mut headers = Vec::with_capacity(parts.headers.len() + 1);
            headers.push((":status".to_string(), parts.status.as_str().to_string()));
            for (name, value) in &parts.headers {
                headers.push((
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                ));
            }
            Ok(ResponseHead { headers })
        })
    }

    fn data(&mut self) -> BoxFuture<'_, Option<Result<Bytes, TransportError>>> {
        Box::pin(async move {
            let recv = self.recv.as_mut()?;
            match recv.data().await? {
                Ok(chunk) => {
                    let _ = recv.flow_control().release_capacity(chunk.len());
                    Some(Ok(chunk))
                }
                Err(e) => Some(Err(e.into())),
            }
        })
    }

    fn reset(&mut self, code: Reason) {
        self.send.send_reset(code);
        self.recv = None;
        self.response = None;
    }
}
