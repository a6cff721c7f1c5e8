//! Framed TCP front end and daemon lifecycle.
//!
//! The transport contract is deliberately small: after connecting, the peer
//! sends one hello frame of JSON carrying the authenticated identity, then
//! any number of `[LEN:u32][IPP message]` frames, each answered by exactly
//! one response frame. TLS, HTTP and authentication live outside the core.

use crate::client::ClientContext;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::scheduler::Scheduler;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use vellum_proto::{Attribute, GroupTag, IppMessage, StatusCode};

/// Upper bound on one framed message (document payload included).
pub const MAX_FRAME: usize = 128 * 1024 * 1024;

pub struct Spooler {
    sched: Arc<Scheduler>,
    dispatcher: Arc<Dispatcher>,
    listener: TcpListener,
}

impl Spooler {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        info!(addr = %config.bind_addr, "listening");
        let sched = Arc::new(Scheduler::new(config).context("scheduler init failed")?);
        Ok(Self {
            sched,
            dispatcher: Arc::new(Dispatcher::new()),
            listener,
        })
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.sched)
    }

    pub async fn run(self) -> Result<()> {
        let sweeper = {
            let sched = Arc::clone(&self.sched);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(1));
                loop {
                    tick.tick().await;
                    sched.sweep(Utc::now()).await;
                }
            })
        };

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let sched = Arc::clone(&self.sched);
                            let dispatcher = Arc::clone(&self.dispatcher);
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(sched, dispatcher, socket, peer.to_string()).await {
                                    debug!(peer = %peer, error = %e, "client connection ended");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
            }
        }

        sweeper.abort();
        self.sched
            .flush(true)
            .map_err(|e| anyhow::anyhow!("final flush failed: {e}"))?;
        Ok(())
    }
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

async fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.flush().await
}

async fn handle_client(
    sched: Arc<Scheduler>,
    dispatcher: Arc<Dispatcher>,
    mut socket: TcpStream,
    peer: String,
) -> Result<()> {
    // hello frame: the transport's authenticated identity
    let ctx = match read_frame(&mut socket).await? {
        Some(frame) => serde_json::from_slice::<ClientContext>(&frame)
            .unwrap_or_else(|_| ClientContext::anonymous(peer.clone())),
        None => return Ok(()),
    };
    debug!(peer = %peer, user = %ctx.user, local = ctx.local, "client connected");

    while let Some(frame) = read_frame(&mut socket).await? {
        let response = match IppMessage::decode(&frame) {
            Ok(msg) => dispatcher.dispatch(&sched, &ctx, &msg),
            Err(e) => {
                warn!(peer = %peer, error = %e, "unparseable request");
                parse_error_response(&frame, &e)
            }
        };
        match response.encode() {
            Ok(bytes) => write_frame(&mut socket, &bytes).await?,
            Err(e) => {
                error!(error = %e, "response encoding failed");
                break;
            }
        }
    }
    Ok(())
}

/// Best-effort response for a message the codec rejected: echo the request
/// id when the header was readable.
fn parse_error_response(frame: &[u8], err: &vellum_proto::ProtoError) -> IppMessage {
    let request_id = if frame.len() >= 8 {
        i32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]).max(0)
    } else {
        0
    };
    let status = match err {
        vellum_proto::ProtoError::BadVersion { .. } => StatusCode::VersionNotSupported,
        _ => StatusCode::BadRequest,
    };
    let mut resp = IppMessage::response((1, 1), status, request_id);
    resp.attrs.append(
        GroupTag::Operation,
        Attribute::charset("attributes-charset", "utf-8"),
    );
    resp.attrs.append(
        GroupTag::Operation,
        Attribute::language("attributes-natural-language", "en"),
    );
    resp.attrs.append(
        GroupTag::Operation,
        Attribute::text("status-message", err.to_string()),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vellum_proto::Operation;

    async fn spooler() -> (TempDir, Spooler) {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.bind_addr = "127.0.0.1:0".to_string();
        config.spool_root = dir.path().join("spool");
        config.cache_root = dir.path().join("cache");
        let spooler = Spooler::bind(config).await.unwrap();
        (dir, spooler)
    }

    async fn send(stream: &mut TcpStream, bytes: &[u8]) {
        stream
            .write_all(&(bytes.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(bytes).await.unwrap();
    }

    async fn recv(stream: &mut TcpStream) -> Vec<u8> {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut buf = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn end_to_end_over_tcp() {
        let (_dir, spooler) = spooler().await;
        let sched = spooler.scheduler();
        sched.registry.write().unwrap().add_printer("press").unwrap();
        let addr = spooler.listener.local_addr().unwrap();
        tokio::spawn(spooler.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let hello = serde_json::to_vec(&ClientContext::local_admin()).unwrap();
        send(&mut stream, &hello).await;

        let mut msg = IppMessage::request((2, 0), Operation::GetPrinterAttributes, 7);
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::charset("attributes-charset", "utf-8"),
        );
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::language("attributes-natural-language", "en"),
        );
        msg.attrs.append(
            GroupTag::Operation,
            Attribute::uri("printer-uri", "ipp://localhost/printers/press"),
        );
        send(&mut stream, &msg.encode().unwrap()).await;

        let resp = IppMessage::decode(&recv(&mut stream).await).unwrap();
        assert_eq!(resp.status(), Some(StatusCode::Ok));
        assert_eq!(resp.request_id, 7);
        assert_eq!(
            resp.attrs.find("printer-name").unwrap().as_str(),
            Some("press")
        );
    }

    #[tokio::test]
    async fn garbage_frame_gets_bad_request() {
        let (_dir, spooler) = spooler().await;
        let addr = spooler.listener.local_addr().unwrap();
        tokio::spawn(spooler.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, b"{}").await; // anonymous hello
        send(&mut stream, &[2, 0, 0, 2, 0, 0, 0, 9, 0xff, 0xff]).await;
        let resp = IppMessage::decode(&recv(&mut stream).await).unwrap();
        assert_eq!(resp.status(), Some(StatusCode::BadRequest));
        assert_eq!(resp.request_id, 9);
    }
}
