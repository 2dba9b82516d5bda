//! Per-connection session handler.
//!
//! A session moves through `Authenticating → Registered → Reading → Closed`.
//! The first line must authenticate; after that every line is a post. Whatever
//! ends the session, its registry entry is released by [`Registration`]'s
//! `Drop` and the socket is closed once the writer task has flushed.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{sink::SinkExt, stream::StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{Instrument, Span, debug, error, field, info, instrument, warn};

use eventchat_core::{ChatError, ConnectionId, EventId, NewMessage, UserId};
use eventchat_logging::{ChatEvent, ChatEventLogger};

use crate::protocol::{self, AuthRequest, OutboundFrame};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::server::GatewayState;

type FrameReader = FramedRead<OwnedReadHalf, LinesCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// Serve one accepted connection until it closes.
#[instrument(skip_all, fields(peer = %peer, user = field::Empty, event = field::Empty))]
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: GatewayState) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(state.config.max_frame_bytes),
    );
    let writer = FramedWrite::new(write_half, LinesCodec::new());

    let (tx, rx) = mpsc::unbounded_channel();
    let conn = ConnectionHandle::new(ConnectionId::new(), tx);
    let write_task =
        tokio::spawn(write_loop(writer, rx, state.config.write_timeout).in_current_span());

    let session = Session { state, conn, peer };
    if let Err(err) = session.run(&mut reader).await {
        match &err {
            ChatError::Transport(e) => info!(error = %e, "Connection dropped"),
            other => warn!(error = %other, "Closing session"),
        }
        if let Some(reply) = err.reply() {
            session.conn.send(protocol::error_frame(&reply));
        }
    }

    // Last local sender goes away here; the writer drains what is queued and
    // shuts the socket down.
    drop(session);
    drop(reader);
    if let Err(e) = write_task.await {
        error!(error = %e, "Writer task failed");
    }
}

struct Session {
    state: GatewayState,
    conn: ConnectionHandle,
    peer: SocketAddr,
}

impl Session {
    async fn run(&self, reader: &mut FrameReader) -> Result<(), ChatError> {
        let Some(auth) = self.authenticate(reader).await? else {
            debug!("Client left before authenticating");
            return Ok(());
        };

        let span = Span::current();
        span.record("user", auth.user.0);
        span.record("event", auth.event.0);

        let _registration = Registration::new(&self.state.registry, auth, self.conn.clone());

        match self.state.broadcaster.publish_to(auth.event, &self.conn).await {
            Ok(true) => {}
            Ok(false) => return Err(writer_stopped()),
            Err(e) => warn!(error = %e, "Initial history push failed"),
        }

        self.read_loop(reader, auth).await
    }

    async fn authenticate(
        &self,
        reader: &mut FrameReader,
    ) -> Result<Option<AuthRequest>, ChatError> {
        let Some(line) = self.next_frame(reader).await? else {
            return Ok(None);
        };

        let result = self.validate(&line).await;
        if let Err(err) = &result {
            ChatEventLogger::log_event(ChatEvent::AuthRejected {
                peer: self.peer.to_string(),
                reason: err.to_string(),
            });
        }
        result.map(Some)
    }

    async fn validate(&self, line: &str) -> Result<AuthRequest, ChatError> {
        let auth = AuthRequest::parse(line)?;
        let identity = &self.state.identity;

        if !identity.user_exists(auth.user).await.map_err(ChatError::Gateway)? {
            return Err(ChatError::Validation(format!("unknown user {}", auth.user)));
        }
        if !identity.event_exists(auth.event).await.map_err(ChatError::Gateway)? {
            return Err(ChatError::Validation(format!("unknown event {}", auth.event)));
        }
        Ok(auth)
    }

    async fn read_loop(
        &self,
        reader: &mut FrameReader,
        auth: AuthRequest,
    ) -> Result<(), ChatError> {
        loop {
            let frame = tokio::select! {
                frame = self.next_frame(reader) => frame?,
                _ = self.conn.closed() => return Err(writer_stopped()),
            };
            let Some(line) = frame else {
                debug!("Client closed the connection");
                return Ok(());
            };
            let Some(text) = protocol::parse_post(&line)? else {
                continue;
            };
            self.post(auth, text).await;
        }
    }

    /// Persist one message, then fan the new history out to the whole event.
    async fn post(&self, auth: AuthRequest, text: String) {
        let message = NewMessage::new(auth.user, auth.event, text);
        match self.state.store.append_message(message).await {
            Ok(stored) => ChatEventLogger::log_event(ChatEvent::MessagePosted {
                user_id: auth.user.0,
                event_id: auth.event.0,
                text: stored.text,
            }),
            Err(e) => {
                let err = ChatError::Persistence(e);
                error!(error = %err, "Message dropped");
                if let Some(reply) = err.reply() {
                    self.conn.send(protocol::error_frame(&reply));
                }
                return;
            }
        }

        if let Err(e) = self.state.broadcaster.publish(auth.event).await {
            warn!(error = %e, "Broadcast failed");
        }
    }

    async fn next_frame(&self, reader: &mut FrameReader) -> Result<Option<String>, ChatError> {
        let next = match self.state.config.idle_timeout {
            Some(limit) => timeout(limit, reader.next()).await.map_err(|_| {
                ChatError::Transport(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "client idle for too long",
                ))
            })?,
            None => reader.next().await,
        };
        Ok(next.transpose()?)
    }
}

fn writer_stopped() -> ChatError {
    ChatError::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "outbound stream stopped"))
}

/// Registry membership of an authenticated session. Dropping it unregisters,
/// on every exit path including unwinding.
struct Registration {
    registry: ConnectionRegistry,
    user: UserId,
    event: EventId,
    conn: ConnectionId,
}

impl Registration {
    fn new(registry: &ConnectionRegistry, auth: AuthRequest, handle: ConnectionHandle) -> Self {
        let conn = handle.id();
        registry.put(auth.user, handle, auth.event);
        info!("User {} connected to event {}", auth.user, auth.event);
        ChatEventLogger::log_event(ChatEvent::Connected {
            user_id: auth.user.0,
            event_id: auth.event.0,
        });
        Self {
            registry: registry.clone(),
            user: auth.user,
            event: auth.event,
            conn,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove_connection(self.user, self.conn);
        info!("User {} disconnected", self.user);
        ChatEventLogger::log_event(ChatEvent::Disconnected {
            user_id: self.user.0,
            event_id: self.event.0,
        });
    }
}

/// Sole owner of the socket's write half.
async fn write_loop(
    mut sink: FrameWriter,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    write_timeout: Option<Duration>,
) {
    while let Some(frame) = rx.recv().await {
        let result = match write_timeout {
            Some(limit) => match timeout(limit, sink.send(frame)).await {
                Ok(sent) => sent,
                Err(_) => Err(LinesCodecError::Io(io::ErrorKind::TimedOut.into())),
            },
            None => sink.send(frame).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Write to client failed");
            return;
        }
    }
    if let Err(e) = SinkExt::<OutboundFrame>::close(&mut sink).await {
        debug!(error = %e, "Closing client stream failed");
    }
}
