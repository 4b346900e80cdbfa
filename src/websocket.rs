//! # WebSocket Relay Handler
//!
//! Accepts client websocket connections and runs one [`RelaySession`] per connection
//! inside an actix actor.
//!
//! ## Endpoints:
//! - `GET /ws?token=<id token>`: audio relay to the upstream realtime service
//! - `GET /ws/chat?token=<id token>`: chat queries answered by the query dispatcher
//!
//! Either route also accepts `mode=audio|chat` to pick the other variant.
//!
//! ## Connection Flow:
//! 1. **Upgrade**: a session slot is reserved (503 when the server is full)
//! 2. **Authentication**: the token is verified off the actor; on failure the client is
//!    closed with 1008 "Authentication failed" and nothing else happens
//! 3. **Upstream** (audio only): one upstream connection is opened with the service key
//! 4. **Relaying**: frames flow both ways until either side closes
//!
//! ## Actor Model:
//! Everything that touches the session runs on the actor. Slow work (verification,
//! the upstream handshake, completion calls) runs in spawned tasks that report back
//! with `addr.do_send(...)`, so one session never blocks another. Chat queries of one
//! session go through a single [`QueryQueue`] and are answered in arrival order.

use crate::auth;
use crate::dispatch::QueryQueue;
use crate::error::{AppError, AuthError, RelayError};
use crate::relay::envelope::Envelope;
use crate::relay::frame::{CloseCode, CloseFrame, Frame, FrameSink};
use crate::relay::session::{ClientFrameOutcome, RelaySession, SessionMode};
use crate::relay::upstream::{connect_upstream, UpstreamEvent, UpstreamHandle, UpstreamReader};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// The client side of a session: the actor's own websocket context.
struct ClientContext<'a>(&'a mut ws::WebsocketContext<RelaySocket>);

impl FrameSink for ClientContext<'_> {
    fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
        match frame {
            Frame::Text(text) => self.0.text(text),
            Frame::Binary(data) => self.0.binary(data),
        }
        Ok(())
    }

    fn close(&mut self, frame: CloseFrame) {
        let code = match frame.code {
            CloseCode::Normal => ws::CloseCode::Normal,
            CloseCode::Policy => ws::CloseCode::Policy,
            CloseCode::Error => ws::CloseCode::Error,
        };
        self.0.close(Some(ws::CloseReason {
            code,
            description: Some(frame.reason),
        }));
        self.0.stop();
    }
}

/// Result of the token check.
#[derive(Message)]
#[rtype(result = "()")]
struct AuthOutcome(Result<auth::Identity, AuthError>);

/// Result of the upstream handshake.
#[derive(Message)]
#[rtype(result = "()")]
struct UpstreamConnected(Result<(UpstreamHandle, UpstreamReader), RelayError>);

/// Something happened on the upstream connection.
#[derive(Message)]
#[rtype(result = "()")]
struct UpstreamMessage(UpstreamEvent);

/// Replies produced by the query dispatcher, in send order.
#[derive(Message)]
#[rtype(result = "()")]
struct DeliverEnvelopes(Vec<Envelope>);

/// WebSocket actor for one relay session.
pub struct RelaySocket {
    session: RelaySession<UpstreamHandle>,
    state: AppState,
    /// Taken when authentication starts
    token: Option<String>,
    last_heartbeat: Instant,
    /// Created by the first chat query
    queries: Option<QueryQueue>,
    upstream_reader: Option<JoinHandle<()>>,
}

impl RelaySocket {
    pub fn new(state: AppState, mode: SessionMode, token: Option<String>) -> Self {
        Self {
            session: RelaySession::new(mode, state.config.relay.clone()),
            state,
            token,
            last_heartbeat: Instant::now(),
            queries: None,
            upstream_reader: None,
        }
    }

    fn start_authentication(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(err) = self.session.begin_authentication() {
            error!(session_id = %self.session.id(), error = %err, "Cannot start authentication");
            ctx.stop();
            return;
        }

        // Missing token: reject without calling the verifier
        let token = match self.token.take() {
            Some(token) => token,
            None => {
                self.fail_authentication(AuthError::MissingToken, ctx);
                return;
            }
        };

        let gate = self.state.services.auth.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            let result = gate.authenticate(Some(&token)).await;
            addr.do_send(AuthOutcome(result));
        });
    }

    fn fail_authentication(&mut self, err: AuthError, ctx: &mut ws::WebsocketContext<Self>) {
        self.state.record_auth_failure();
        self.session.reject(&mut ClientContext(ctx), &err);
    }

    fn start_upstream(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(err) = self.session.begin_upstream() {
            warn!(session_id = %self.session.id(), error = %err, "Upstream not started");
            return;
        }

        let config = self.state.config.upstream.clone();
        let api_key = self.state.secrets.openai_api_key.clone();
        let addr = ctx.address();
        info!(session_id = %self.session.id(), url = %config.url, "Connecting to upstream service");

        tokio::spawn(async move {
            let result = connect_upstream(&config, &api_key).await;
            addr.do_send(UpstreamConnected(result));
        });
    }

    fn dispatch_query(&mut self, query: String, ctx: &mut ws::WebsocketContext<Self>) {
        self.state.record_chat_query();
        debug!(session_id = %self.session.id(), chars = query.len(), "Dispatching chat query");

        let queue = self.queries.get_or_insert_with(|| {
            let addr = ctx.address();
            self.state
                .services
                .dispatcher
                .spawn_queue(move |replies| addr.do_send(DeliverEnvelopes(replies)))
        });
        if !queue.submit(query) {
            warn!(session_id = %self.session.id(), "Query worker gone, query dropped");
        }
    }

    fn on_client_frame(&mut self, frame: Frame, ctx: &mut ws::WebsocketContext<Self>) {
        match self.session.on_client_frame(frame, &mut ClientContext(ctx)) {
            ClientFrameOutcome::Query(query) => self.dispatch_query(query, ctx),
            ClientFrameOutcome::Forwarded | ClientFrameOutcome::Dropped => {}
        }
    }

    fn client_gone(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.session.on_client_closed();
        ctx.stop();
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            session_id = %self.session.id(),
            mode = self.session.mode().as_str(),
            "Relay connection started"
        );

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session.id(), "Client heartbeat timeout, closing connection");
                act.client_gone(ctx);
            } else {
                ctx.ping(b"");
            }
        });

        self.start_authentication(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // No-op when the session already closed
        self.session.on_client_closed();
        self.queries = None;
        if let Some(reader) = self.upstream_reader.take() {
            reader.abort();
        }
        let stats = self.session.stats();
        self.state.close_session(stats);

        info!(
            session_id = %self.session.id(),
            client_to_upstream = stats.client_to_upstream,
            upstream_to_client = stats.upstream_to_client,
            dropped = stats.dropped,
            "Relay connection stopped"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.on_client_frame(Frame::Text(text.to_string()), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.on_client_frame(Frame::Binary(data.to_vec()), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id(), ?reason, "Client closed connection");
                self.session.on_client_closed();
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id(), "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session.id(), error = %err, "WebSocket protocol error");
                self.client_gone(ctx);
            }
        }
    }
}

impl Handler<AuthOutcome> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: AuthOutcome, ctx: &mut Self::Context) {
        let identity = match msg.0 {
            Ok(identity) => identity,
            Err(err) => {
                self.fail_authentication(err, ctx);
                return;
            }
        };

        if let Err(err) = self.session.authenticated(identity.subject) {
            debug!(session_id = %self.session.id(), error = %err, "Authentication result ignored");
            return;
        }

        match self.session.mode() {
            SessionMode::Audio => self.start_upstream(ctx),
            SessionMode::Chat => {
                if let Err(err) = self.session.start_chat() {
                    warn!(session_id = %self.session.id(), error = %err, "Chat session not started");
                }
            }
        }
    }
}

impl Handler<UpstreamConnected> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: UpstreamConnected, ctx: &mut Self::Context) {
        match msg.0 {
            Ok((handle, reader)) => {
                if self.session.attach_upstream(handle) {
                    let addr = ctx.address();
                    self.upstream_reader =
                        Some(reader.spawn(move |event| addr.do_send(UpstreamMessage(event))));
                }
            }
            Err(err) => {
                self.session.upstream_connect_failed(&mut ClientContext(ctx), &err);
            }
        }
    }
}

impl Handler<UpstreamMessage> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: UpstreamMessage, ctx: &mut Self::Context) {
        match msg.0 {
            UpstreamEvent::Frame(frame) => {
                self.session.on_upstream_frame(frame, &mut ClientContext(ctx));
            }
            UpstreamEvent::Closed => {
                self.session.on_upstream_closed(&mut ClientContext(ctx));
            }
            UpstreamEvent::Failed(err) => {
                self.session.on_upstream_error(&mut ClientContext(ctx), &err);
            }
        }
    }
}

impl Handler<DeliverEnvelopes> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: DeliverEnvelopes, ctx: &mut Self::Context) {
        for envelope in msg.0 {
            self.session.deliver(envelope, &mut ClientContext(ctx));
        }
    }
}

/// `mode` query parameter, if present and valid.
fn requested_mode(query: &str) -> Option<SessionMode> {
    let params = web::Query::<HashMap<String, String>>::from_query(query).ok()?;
    match params.get("mode").map(|m| m.to_ascii_lowercase()).as_deref() {
        Some("audio") => Some(SessionMode::Audio),
        Some("chat") => Some(SessionMode::Chat),
        _ => None,
    }
}

async fn start_relay(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    default_mode: SessionMode,
) -> ActixResult<HttpResponse> {
    let mode = requested_mode(req.query_string()).unwrap_or(default_mode);
    let token = auth::extract_token(req.query_string());

    info!(
        peer = ?req.connection_info().peer_addr(),
        mode = mode.as_str(),
        has_token = token.is_some(),
        "New relay connection request"
    );

    if !state.try_open_session() {
        warn!("Session limit reached, refusing connection");
        return Err(AppError::ServiceUnavailable("Too many active sessions".to_string()).into());
    }

    let socket = RelaySocket::new(state.get_ref().clone(), mode, token);
    ws::start(socket, &req, stream).map_err(|err| {
        // The actor never started, so release its slot here
        state.close_session(Default::default());
        err
    })
}

/// `GET /ws`: audio relay unless `mode=chat` is given.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    start_relay(req, stream, state, SessionMode::Audio).await
}

/// `GET /ws/chat`: chat relay unless `mode=audio` is given.
pub async fn chat_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    start_relay(req, stream, state, SessionMode::Chat).await
}
