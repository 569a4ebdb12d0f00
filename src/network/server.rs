use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::gateway::GatewayService;
use crate::network::{encode_reply, Connection};
use crate::protocol::{GatewayReply, GatewayRequest};
use crate::service::{global_config, GatewayError, GatewayResult, ShutdownListener, ShutdownNotify};

const CONN_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Transient accept failures (typically fd exhaustion while every
/// connection slot is busy streaming) get this many retries before the
/// accept loop gives up and hands the failure to the node.
const MAX_ACCEPT_RETRIES: u32 = 6;

/// Accept loop for the framed carrier. One request per connection decides
/// the verb; unary verbs keep the connection for further requests,
/// streaming verbs consume it until the reply stream or the peer ends.
pub struct GatewayServer {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    shutdown: ShutdownNotify,
    handlers_done_tx: mpsc::Sender<()>,
    service: Arc<GatewayService>,
}

impl GatewayServer {
    pub fn new(
        listener: TcpListener,
        limit_connections: Arc<Semaphore>,
        shutdown: ShutdownNotify,
        handlers_done_tx: mpsc::Sender<()>,
        service: Arc<GatewayService>,
    ) -> GatewayServer {
        GatewayServer {
            listener,
            limit_connections,
            shutdown,
            handlers_done_tx,
            service,
        }
    }

    pub async fn run(&self) -> GatewayResult<()> {
        let max_frame_size = global_config().network.max_frame_size;
        let mut shutdown = self.shutdown.listener();

        while !shutdown.is_received() {
            // a slot is taken before accepting, so at capacity the pushback
            // lands on the listener queue instead of on half-served clients
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .unwrap();

            let socket = tokio::select! {
                res = self.accept() => res?,
                _ = shutdown.recv() => break,
            };

            let (reader, writer) = socket.into_split();
            let mut handler = ConnectionHandler {
                shutdown: self.shutdown.listener(),
                _handlers_done_tx: self.handlers_done_tx.clone(),
                connection: Connection::new(reader, CONN_READ_BUFFER_SIZE, max_frame_size),
                writer: BufWriter::new(writer),
                service: self.service.clone(),
            };

            tokio::spawn(async move {
                // the slot stays taken for the lifetime of this handler
                let _permit = permit;
                if let Err(err) = handler.handle_connection().await {
                    error!("connection handler failed: {:?}", err);
                }
            });
        }

        info!("accept loop stopped");
        Ok(())
    }

    /// Accepts the next connection, retrying transient failures with a
    /// capped delay. A listener that keeps failing takes the server down so
    /// the node can surface it instead of spinning.
    async fn accept(&self) -> GatewayResult<TcpStream> {
        let mut delay = Duration::from_millis(100);
        let mut attempts = 0u32;

        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("accepted connection from {}", peer);
                    return Ok(socket);
                }
                Err(err) if attempts < MAX_ACCEPT_RETRIES => {
                    attempts += 1;
                    warn!(
                        "accept attempt {} failed, retrying in {:?}: {}",
                        attempts, delay, err
                    );
                    time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
                Err(err) => {
                    return Err(GatewayError::DetailedIo(format!(
                        "listener gave up after {} failed accepts: {}",
                        attempts, err
                    )));
                }
            }
        }
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        debug!("gateway server dropped");
    }
}

struct ConnectionHandler {
    shutdown: ShutdownListener,
    _handlers_done_tx: mpsc::Sender<()>,
    connection: Connection,
    writer: BufWriter<OwnedWriteHalf>,
    service: Arc<GatewayService>,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> GatewayResult<()> {
        loop {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = self.shutdown.recv() => {
                    debug!("read loop stopped by shutdown signal");
                    return Ok(());
                }
            };

            let frame = match maybe_frame {
                Some(frame) => frame,
                // clean close between requests
                None => break,
            };

            match frame.request {
                GatewayRequest::Publish(request) => {
                    let reply = match self.service.publish(request).await {
                        Ok(reply) => GatewayReply::Publish(reply),
                        Err(status) => GatewayReply::Error(status),
                    };
                    write_reply(&mut self.writer, &reply).await?;
                }
                GatewayRequest::Ack(request) => {
                    let reply = match self.service.ack(request).await {
                        Ok(()) => GatewayReply::Ack {},
                        Err(status) => GatewayReply::Error(status),
                    };
                    write_reply(&mut self.writer, &reply).await?;
                }
                GatewayRequest::GetOffsets(request) => {
                    let reply = match self.service.get_offsets(request).await {
                        Ok(reply) => GatewayReply::Offsets(reply),
                        Err(status) => GatewayReply::Error(status),
                    };
                    write_reply(&mut self.writer, &reply).await?;
                }
                GatewayRequest::Subscribe(request) => {
                    let replies = self.service.subscribe(request);
                    let replies: BoxStream<'static, GatewayReply> =
                        Box::pin(replies.map(|item| match item {
                            Ok(reply) => GatewayReply::Assignment(reply),
                            Err(status) => GatewayReply::Error(status),
                        }));
                    return self.stream_replies(replies).await;
                }
                GatewayRequest::Receive(request) => {
                    let replies = self.service.receive(request);
                    let replies: BoxStream<'static, GatewayReply> =
                        Box::pin(replies.map(|item| match item {
                            Ok(reply) => GatewayReply::Record(reply),
                            Err(status) => GatewayReply::Error(status),
                        }));
                    return self.stream_replies(replies).await;
                }
            }
        }
        debug!("read loop finished, client went away");

        Ok(())
    }

    /// Forwards a reply stream frame by frame. Demand is one frame at a
    /// time, so the bounded reply channel is the only buffer between a
    /// record source and the socket. Dropping the stream on exit is the
    /// cancellation signal for the call.
    async fn stream_replies(
        &mut self,
        mut replies: BoxStream<'static, GatewayReply>,
    ) -> GatewayResult<()> {
        loop {
            tokio::select! {
                maybe_reply = replies.next() => match maybe_reply {
                    Some(reply) => {
                        let terminal = matches!(reply, GatewayReply::Error(_));
                        write_reply(&mut self.writer, &reply).await?;
                        if terminal {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                res = self.connection.read_frame() => match res? {
                    // peer went away, the dropped stream cancels the call
                    None => {
                        debug!("peer closed a streaming call");
                        return Ok(());
                    }
                    Some(_) => {
                        return Err(GatewayError::Protocol(
                            "unexpected frame on a streaming call".to_string(),
                        ));
                    }
                },
                _ = self.shutdown.recv() => {
                    info!("streaming call stopped by shutdown signal");
                    return Ok(());
                }
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("connection handler dropped");
    }
}

async fn write_reply(
    writer: &mut BufWriter<OwnedWriteHalf>,
    reply: &GatewayReply,
) -> GatewayResult<()> {
    let frame = encode_reply(reply)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| GatewayError::DetailedIo(format!("write reply error: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| GatewayError::DetailedIo(format!("flush reply error: {}", e)))?;
    Ok(())
}
