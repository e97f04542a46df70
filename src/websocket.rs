//! # WebSocket Streaming Endpoint
//!
//! Clients connect to `/ws/stream?token=<api key>`, send one JSON init message
//! and then raw PCM as binary frames. Detections come back as JSON text
//! messages every time another analysis window has been received.
//!
//! ## Structure:
//! The socket actor only moves frames. All protocol logic lives in
//! `audio::session::StreamSession`, which runs as its own task:
//! - **socket → session**: bounded channel of `Inbound` frames. When the queue
//!   is full the actor stops reading from the socket until there is room.
//! - **session → socket**: unbounded channel of `Outbound` messages and the
//!   final close code.
//!
//! Dropping the inbound sender (actor stopped) tells the session the client
//! is gone.

use crate::audio::protocol::{Inbound, Outbound};
use crate::audio::session::{StreamSession, StreamSettings};
use crate::state::AppState;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::web::BytesMut;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Query string of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

/// Session waiting for the actor to start.
struct PendingSession {
    session: StreamSession,
    token: Option<String>,
    inbound: mpsc::Receiver<Inbound>,
}

/// A fragmented message being reassembled.
struct Fragments {
    text: bool,
    data: BytesMut,
}

/// One `/ws/stream` connection.
pub struct StreamSocket {
    session_id: Uuid,
    app_state: web::Data<AppState>,

    /// `None` once the client is gone
    inbound: Option<mpsc::Sender<Inbound>>,

    /// Taken in `started`
    pending: Option<PendingSession>,

    fragments: Option<Fragments>,
    max_message_bytes: usize,
}

impl StreamSocket {
    pub fn new(app_state: web::Data<AppState>, token: Option<String>) -> Self {
        let config = &app_state.config;
        let session = StreamSession::new(
            app_state.analyzer.clone(),
            StreamSettings::from_config(&config.stream),
            config.auth.api_key.clone(),
        );
        let (inbound_tx, inbound_rx) = mpsc::channel(config.stream.inbound_queue);
        let max_message_bytes = config.stream.max_frame_bytes;

        Self {
            session_id: Uuid::new_v4(),
            app_state,
            inbound: Some(inbound_tx),
            pending: Some(PendingSession {
                session,
                token,
                inbound: inbound_rx,
            }),
            fragments: None,
            max_message_bytes,
        }
    }

    /// Queue a frame for the session.
    ///
    /// `ctx.wait` holds back further socket frames until the session has room,
    /// so a slow engine pushes back on the client instead of buffering audio.
    fn forward(&mut self, frame: Inbound, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(tx) = self.inbound.clone() else {
            return;
        };

        ctx.wait(
            async move { tx.send(frame).await.is_ok() }
                .into_actor(self)
                .map(|delivered, act, _ctx| {
                    // Session already finished; its close is on the way.
                    if !delivered {
                        act.inbound = None;
                    }
                }),
        );
    }

    /// Reassemble continuation frames into one message.
    fn continuation(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        let (first, last, text, chunk) = match item {
            Item::FirstText(chunk) => (true, false, true, chunk),
            Item::FirstBinary(chunk) => (true, false, false, chunk),
            Item::Continue(chunk) => (false, false, false, chunk),
            Item::Last(chunk) => (false, true, false, chunk),
        };

        if first {
            if self.fragments.is_some() {
                warn!(session_id = %self.session_id, "New fragmented message before the previous one ended");
                return self.protocol_violation(ctx);
            }
            self.fragments = Some(Fragments {
                text,
                data: BytesMut::new(),
            });
        }

        let Some(fragments) = self.fragments.as_mut() else {
            warn!(session_id = %self.session_id, "Continuation frame without a first fragment");
            return self.protocol_violation(ctx);
        };

        if fragments.data.len() + chunk.len() > self.max_message_bytes {
            warn!(
                session_id = %self.session_id,
                limit = self.max_message_bytes,
                "Fragmented message exceeds the size limit"
            );
            return self.protocol_violation(ctx);
        }
        fragments.data.extend_from_slice(&chunk);

        if last {
            if let Some(Fragments { text, data }) = self.fragments.take() {
                let data = data.freeze();
                let frame = if text {
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => Inbound::Text(text),
                        Err(_) => {
                            warn!(session_id = %self.session_id, "Fragmented text message is not UTF-8");
                            return self.protocol_violation(ctx);
                        }
                    }
                } else {
                    Inbound::Binary(data)
                };
                self.forward(frame, ctx);
            }
        }
    }

    fn protocol_violation(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.inbound = None;
        ctx.close(Some(ws::CloseCode::Protocol.into()));
        ctx.stop();
    }
}

impl Actor for StreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.app_state.increment_active_sessions();
        info!(session_id = %self.session_id, "Stream connection opened");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        ctx.add_stream(UnboundedReceiverStream::new(outbound_rx));

        if let Some(PendingSession { session, token, inbound }) = self.pending.take() {
            let span = info_span!("stream_session", session_id = %self.session_id);
            tokio::spawn(
                async move {
                    let report = session.run(token, inbound, outbound_tx).await;
                    debug!(
                        state = report.state.as_str(),
                        reason = %report.reason,
                        bytes_received = report.bytes_received,
                        windows_analyzed = report.windows_analyzed,
                        "Session report"
                    );
                }
                .instrument(span),
            );
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.app_state.decrement_active_sessions();
        info!(session_id = %self.session_id, "Stream connection closed");
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for StreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.forward(Inbound::Text(text.to_string()), ctx),
            Ok(ws::Message::Binary(data)) => self.forward(Inbound::Binary(data), ctx),
            Ok(ws::Message::Continuation(item)) => self.continuation(item, ctx),
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Nop) => {}
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.session_id, ?reason, "Client sent close");
                self.inbound = None;
                ctx.close(reason);
                ctx.stop();
            }
            // Includes single frames over `max_frame_bytes`
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "WebSocket protocol error");
                self.protocol_violation(ctx);
            }
        }
    }
}

/// Messages from the session task.
impl StreamHandler<Outbound> for StreamSocket {
    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Message(message) => ctx.text(message.to_json()),
            Outbound::Close(code) => {
                self.inbound = None;
                ctx.close(Some(code.into()));
                ctx.stop();
            }
        }
    }

    // Session task ended without a close; the client is already gone.
    fn finished(&mut self, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

/// `GET /ws/stream`: upgrade to a streaming session.
///
/// The token is checked by the session after the upgrade so a bad credential
/// gets a policy-violation close rather than an HTTP error.
pub async fn stream_websocket(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<StreamQuery>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!(peer = ?req.peer_addr(), "Stream connection request");

    let frame_size = app_state.config.stream.max_frame_bytes;
    let socket = StreamSocket::new(app_state, query.into_inner().token);

    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(frame_size)
        .start()
}
