//! # Relay Session
//!
//! One end-to-end pairing of a client connection with (in audio mode) one upstream
//! connection. The session is the single point of truth for "is forwarding allowed":
//! every send is preceded by a check of the explicit [`SessionState`] and of the
//! open flag of the destination side.
//!
//! ## Session Lifecycle:
//! ```text
//! connecting -> authenticating -> authenticated -> upstream-connecting -> relaying   (audio)
//!                                              \-> relaying                          (chat)
//! relaying -> closing -> closed
//! authenticating -> closed                                     (authentication failed)
//! ```
//! No state is re-entered; `closed` is terminal.
//!
//! ## Ownership:
//! The session owns its upstream handle exclusively (`Option<U>`). The client side is
//! passed in on every call because it is the actor context that hosts the session.

use crate::audio::codec;
use crate::config::RelayConfig;
use crate::error::{AuthError, RelayError};
use crate::relay::envelope::Envelope;
use crate::relay::frame::{CloseFrame, Frame, FrameSink};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Authenticated,
    UpstreamConnecting,
    Relaying,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated => "authenticated",
            SessionState::UpstreamConnecting => "upstream-connecting",
            SessionState::Relaying => "relaying",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Connecting, Authenticating) => true,
            (Authenticating, Authenticated) => true,
            (Authenticating, Closed) => true,
            (Authenticated, UpstreamConnecting) => true,
            (Authenticated, Relaying) => true,
            (UpstreamConnecting, Relaying) => true,
            (Closing, Closed) => true,
            (Closing, _) | (Closed, _) => false,
            (_, Closing) => true,
            _ => false,
        }
    }
}

/// Which variant of the relay a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Raw frames relayed to and from the upstream realtime service
    Audio,
    /// Plain-text queries answered by the query dispatcher
    Chat,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Audio => "audio",
            SessionMode::Chat => "chat",
        }
    }
}

/// What happened to a client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrameOutcome {
    /// Sent to the upstream connection
    Forwarded,
    /// Discarded (session not relaying, destination closed, or invalid payload)
    Dropped,
    /// Chat query to hand to the dispatcher
    Query(String),
}

/// Per-session frame counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
    pub dropped: u64,
}

pub struct RelaySession<U> {
    id: String,
    mode: SessionMode,
    options: RelayConfig,
    state: SessionState,
    subject: Option<String>,
    upstream: Option<U>,
    client_open: bool,
    stats: RelayStats,
}

impl<U: FrameSink> RelaySession<U> {
    pub fn new(mode: SessionMode, options: RelayConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mode,
            options,
            state: SessionState::Connecting,
            subject: None,
            upstream: None,
            client_open: true,
            stats: RelayStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn is_relaying(&self) -> bool {
        self.state == SessionState::Relaying
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    fn transition(&mut self, next: SessionState) -> Result<(), RelayError> {
        if !self.state.can_transition_to(next) {
            return Err(RelayError::InvalidTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }

        debug!(
            session_id = %self.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Session state transition"
        );
        self.state = next;
        Ok(())
    }

    pub fn begin_authentication(&mut self) -> Result<(), RelayError> {
        self.transition(SessionState::Authenticating)
    }

    /// Record the verified subject. No frame is relayed before this succeeds.
    pub fn authenticated(&mut self, subject: String) -> Result<(), RelayError> {
        self.transition(SessionState::Authenticated)?;
        info!(session_id = %self.id, subject = %subject, "Session authenticated");
        self.subject = Some(subject);
        Ok(())
    }

    /// Terminal authentication failure: close the client with the policy code and end
    /// the session without ever opening an upstream.
    pub fn reject(&mut self, client: &mut dyn FrameSink, err: &AuthError) {
        warn!(session_id = %self.id, error = %err, "Client authentication failed");

        if self.transition(SessionState::Closed).is_err() {
            self.force_closed();
        }

        if self.client_open {
            self.client_open = false;
            client.close(CloseFrame::authentication_failed());
        }
    }

    /// Audio mode: the upstream connection attempt is about to start.
    pub fn begin_upstream(&mut self) -> Result<(), RelayError> {
        self.transition(SessionState::UpstreamConnecting)
    }

    /// Chat mode: start relaying immediately, there is no upstream socket.
    pub fn start_chat(&mut self) -> Result<(), RelayError> {
        self.transition(SessionState::Relaying)
    }

    /// Hand the freshly opened upstream connection to the session.
    ///
    /// If the session stopped waiting for it (the client left during the connect),
    /// the connection is closed right away and `false` is returned.
    pub fn attach_upstream(&mut self, mut upstream: U) -> bool {
        if self.state != SessionState::UpstreamConnecting {
            debug!(
                session_id = %self.id,
                state = self.state.as_str(),
                "Upstream opened after session stopped waiting, closing it"
            );
            upstream.close(CloseFrame::client_disconnected());
            return false;
        }

        self.upstream = Some(upstream);
        // UpstreamConnecting -> Relaying is always legal
        let _ = self.transition(SessionState::Relaying);
        info!(session_id = %self.id, "Upstream connection established, relaying");
        true
    }

    /// The upstream connection could not be opened.
    pub fn upstream_connect_failed(&mut self, client: &mut dyn FrameSink, err: &RelayError) {
        warn!(session_id = %self.id, error = %err, "Upstream connection failed");
        self.finish(client, CloseFrame::upstream_error());
    }

    /// React to one frame from the client.
    pub fn on_client_frame(&mut self, frame: Frame, client: &mut dyn FrameSink) -> ClientFrameOutcome {
        if !self.is_relaying() {
            debug!(
                session_id = %self.id,
                state = self.state.as_str(),
                kind = frame.kind(),
                "Dropping client frame, session is not relaying"
            );
            self.stats.dropped += 1;
            return ClientFrameOutcome::Dropped;
        }

        match self.mode {
            SessionMode::Chat => match frame {
                Frame::Text(query) => ClientFrameOutcome::Query(query),
                Frame::Binary(data) => {
                    warn!(session_id = %self.id, bytes = data.len(), "Binary frame in chat session");
                    self.stats.dropped += 1;
                    self.deliver(
                        Envelope::Error("Binary frames are not supported in chat mode".to_string()),
                        client,
                    );
                    ClientFrameOutcome::Dropped
                }
            },
            SessionMode::Audio => match self.prepare_upstream_frame(frame, client) {
                Some(frame) => self.forward_upstream(frame),
                None => {
                    self.stats.dropped += 1;
                    ClientFrameOutcome::Dropped
                }
            },
        }
    }

    /// Validate `audio_in` envelopes; everything else passes through untouched.
    fn prepare_upstream_frame(&mut self, frame: Frame, client: &mut dyn FrameSink) -> Option<Frame> {
        let text = match frame {
            Frame::Text(text) => text,
            binary => return Some(binary),
        };

        let payload = match Envelope::parse(&text) {
            Some(Envelope::AudioIn(payload)) => payload,
            _ => return Some(Frame::Text(text)),
        };

        match codec::decode_payload(&payload) {
            Ok(bytes) if self.options.decode_audio_in => Some(Frame::Binary(bytes)),
            Ok(_) => Some(Frame::Text(text)),
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "Invalid audio_in payload");
                self.deliver(Envelope::Error(format!("Invalid audio_in payload: {}", err)), client);
                None
            }
        }
    }

    fn forward_upstream(&mut self, frame: Frame) -> ClientFrameOutcome {
        let upstream = match self.upstream.as_mut() {
            Some(upstream) => upstream,
            None => {
                self.stats.dropped += 1;
                return ClientFrameOutcome::Dropped;
            }
        };

        match upstream.send(frame) {
            Ok(()) => {
                self.stats.client_to_upstream += 1;
                ClientFrameOutcome::Forwarded
            }
            Err(err) => {
                debug!(session_id = %self.id, error = %err, "Upstream send failed, frame dropped");
                self.stats.dropped += 1;
                ClientFrameOutcome::Dropped
            }
        }
    }

    /// React to one frame from the upstream. Returns whether it reached the client.
    pub fn on_upstream_frame(&mut self, frame: Frame, client: &mut dyn FrameSink) -> bool {
        if !self.is_relaying() || !self.client_open {
            self.stats.dropped += 1;
            return false;
        }

        let frame = match frame {
            Frame::Text(text) if self.options.wrap_upstream_text => {
                match Envelope::Transcript(text).into_frame() {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(session_id = %self.id, error = %err, "Failed to wrap transcript");
                        self.stats.dropped += 1;
                        return false;
                    }
                }
            }
            other => other,
        };

        match client.send(frame) {
            Ok(()) => {
                self.stats.upstream_to_client += 1;
                true
            }
            Err(err) => {
                debug!(session_id = %self.id, error = %err, "Client send failed, frame dropped");
                self.stats.dropped += 1;
                false
            }
        }
    }

    /// Send an envelope to the client if the session is still relaying.
    pub fn deliver(&mut self, envelope: Envelope, client: &mut dyn FrameSink) -> bool {
        if !self.is_relaying() || !self.client_open {
            debug!(session_id = %self.id, tag = envelope.tag(), "Envelope dropped, session not relaying");
            return false;
        }

        let frame = match envelope.into_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "Failed to serialize envelope");
                return false;
            }
        };

        client.send(frame).is_ok()
    }

    /// The client connection closed (or errored). Closes the upstream exactly once.
    pub fn on_client_closed(&mut self) {
        if self.is_closed() {
            return;
        }

        info!(session_id = %self.id, state = self.state.as_str(), "Client connection closed");
        self.client_open = false;
        self.enter_closing();
        self.close_upstream(CloseFrame::client_disconnected());
        self.enter_closed();
    }

    /// The upstream connection closed gracefully.
    pub fn on_upstream_closed(&mut self, client: &mut dyn FrameSink) {
        if self.is_closed() {
            return;
        }

        info!(session_id = %self.id, "Upstream connection closed");
        // Already closed by the peer, nothing to send
        self.upstream = None;
        self.finish(client, CloseFrame::upstream_disconnected());
    }

    /// The upstream connection failed mid-session.
    pub fn on_upstream_error(&mut self, client: &mut dyn FrameSink, err: &RelayError) {
        if self.is_closed() {
            return;
        }

        warn!(session_id = %self.id, error = %err, "Upstream connection error");
        self.finish(client, CloseFrame::upstream_error());
    }

    /// Tear the session down from the upstream side: close whatever upstream is left,
    /// then the client with `client_reason`.
    fn finish(&mut self, client: &mut dyn FrameSink, client_reason: CloseFrame) {
        if self.is_closed() {
            return;
        }

        self.enter_closing();
        self.close_upstream(CloseFrame::upstream_error());

        if self.client_open {
            self.client_open = false;
            client.close(client_reason);
        }

        self.enter_closed();
    }

    fn close_upstream(&mut self, reason: CloseFrame) {
        if let Some(mut upstream) = self.upstream.take() {
            upstream.close(reason);
        }
    }

    fn enter_closing(&mut self) {
        if self.state != SessionState::Closing && self.transition(SessionState::Closing).is_err() {
            self.force_closed();
        }
    }

    fn enter_closed(&mut self) {
        if self.transition(SessionState::Closed).is_err() {
            self.force_closed();
        }
    }

    fn force_closed(&mut self) {
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    /// Records everything sent to one side of the session.
    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Frame>,
        closes: Vec<CloseFrame>,
    }

    impl FrameSink for RecordingSink {
        fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
            self.frames.push(frame);
            Ok(())
        }

        fn close(&mut self, frame: CloseFrame) {
            self.closes.push(frame);
        }
    }

    /// Upstream stand-in that shares its log with the test after being moved into
    /// the session.
    #[derive(Clone, Default)]
    struct SharedSink(std::rc::Rc<std::cell::RefCell<RecordingSink>>);

    impl FrameSink for SharedSink {
        fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
            self.0.borrow_mut().send(frame)
        }

        fn close(&mut self, frame: CloseFrame) {
            self.0.borrow_mut().close(frame)
        }
    }

    fn options() -> RelayConfig {
        RelayConfig {
            decode_audio_in: false,
            wrap_upstream_text: false,
        }
    }

    fn relaying_audio_session(options: RelayConfig) -> (RelaySession<SharedSink>, SharedSink) {
        let mut session = RelaySession::new(SessionMode::Audio, options);
        session.begin_authentication().unwrap();
        session.authenticated("user-1".to_string()).unwrap();
        session.begin_upstream().unwrap();
        let upstream = SharedSink::default();
        assert!(session.attach_upstream(upstream.clone()));
        (session, upstream)
    }

    #[test]
    fn test_state_machine_is_one_directional() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Closed));
        assert!(Relaying.can_transition_to(Closing));
        assert!(!Relaying.can_transition_to(Authenticating));
        assert!(!Closed.can_transition_to(Closing));
        assert!(!Closing.can_transition_to(Relaying));
        assert!(!Authenticated.can_transition_to(Authenticating));
    }

    #[test]
    fn test_rejected_session_never_relays() {
        let mut session: RelaySession<SharedSink> = RelaySession::new(SessionMode::Audio, options());
        let mut client = RecordingSink::default();
        session.begin_authentication().unwrap();

        session.reject(&mut client, &AuthError::MissingToken);

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(client.closes, vec![CloseFrame::authentication_failed()]);
        assert!(session.begin_upstream().is_err());

        let outcome = session.on_client_frame(Frame::Text("hello".to_string()), &mut client);
        assert_eq!(outcome, ClientFrameOutcome::Dropped);
        assert!(client.frames.is_empty());
    }

    #[test]
    fn test_frames_before_upstream_open_are_dropped() {
        let mut session: RelaySession<SharedSink> = RelaySession::new(SessionMode::Audio, options());
        let mut client = RecordingSink::default();
        session.begin_authentication().unwrap();
        session.authenticated("user-1".to_string()).unwrap();
        session.begin_upstream().unwrap();

        let outcome = session.on_client_frame(Frame::Binary(vec![1, 2, 3]), &mut client);
        assert_eq!(outcome, ClientFrameOutcome::Dropped);

        let upstream = SharedSink::default();
        assert!(session.attach_upstream(upstream.clone()));
        assert!(upstream.0.borrow().frames.is_empty());
    }

    #[test]
    fn test_client_frames_reach_upstream_in_order_unmodified() {
        let (mut session, upstream) = relaying_audio_session(options());
        let mut client = RecordingSink::default();

        let sent: Vec<Frame> = (0..50u8)
            .map(|i| {
                if i % 2 == 0 {
                    Frame::Binary(vec![i, i.wrapping_mul(3), 0xff])
                } else {
                    Frame::Text(format!(r#"{{"type":"input_audio_buffer.append","n":{}}}"#, i))
                }
            })
            .collect();

        for frame in sent.clone() {
            assert_eq!(session.on_client_frame(frame, &mut client), ClientFrameOutcome::Forwarded);
        }

        assert_eq!(upstream.0.borrow().frames, sent);
        assert_eq!(session.stats().client_to_upstream, 50);
        assert!(client.frames.is_empty());
    }

    #[test]
    fn test_upstream_frames_reach_client_in_order_unmodified() {
        let (mut session, _upstream) = relaying_audio_session(options());
        let mut client = RecordingSink::default();

        let received: Vec<Frame> = (0..40u8)
            .map(|i| {
                if i % 3 == 0 {
                    Frame::Text(format!("delta {}", i))
                } else {
                    Frame::Binary(vec![i; (i as usize) + 1])
                }
            })
            .collect();

        for frame in received.clone() {
            assert!(session.on_upstream_frame(frame, &mut client));
        }

        assert_eq!(client.frames, received);
        assert_eq!(session.stats().upstream_to_client, 40);
    }

    #[test]
    fn test_valid_audio_in_is_forwarded_as_sent() {
        let (mut session, upstream) = relaying_audio_session(options());
        let mut client = RecordingSink::default();
        let payload = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
        let text = format!(r#"{{"type":"audio_in","data":"{}"}}"#, payload);

        let outcome = session.on_client_frame(Frame::Text(text.clone()), &mut client);

        assert_eq!(outcome, ClientFrameOutcome::Forwarded);
        assert_eq!(upstream.0.borrow().frames, vec![Frame::Text(text)]);
    }

    #[test]
    fn test_audio_in_decoded_when_enabled() {
        let (mut session, upstream) = relaying_audio_session(RelayConfig {
            decode_audio_in: true,
            wrap_upstream_text: false,
        });
        let mut client = RecordingSink::default();
        let payload = base64::engine::general_purpose::STANDARD.encode([9u8, 8, 7]);
        let text = format!(r#"{{"type":"audio_in","data":"{}"}}"#, payload);

        session.on_client_frame(Frame::Text(text), &mut client);

        assert_eq!(upstream.0.borrow().frames, vec![Frame::Binary(vec![9, 8, 7])]);
    }

    #[test]
    fn test_invalid_audio_in_is_reported_not_forwarded() {
        let (mut session, upstream) = relaying_audio_session(options());
        let mut client = RecordingSink::default();

        let outcome = session.on_client_frame(
            Frame::Text(r#"{"type":"audio_in","data":"not base64!!"}"#.to_string()),
            &mut client,
        );

        assert_eq!(outcome, ClientFrameOutcome::Dropped);
        assert!(upstream.0.borrow().frames.is_empty());
        assert_eq!(client.frames.len(), 1);
        match Envelope::parse(match &client.frames[0] {
            Frame::Text(text) => text,
            Frame::Binary(_) => panic!("expected text"),
        }) {
            Some(Envelope::Error(message)) => assert!(message.contains("audio_in")),
            other => panic!("unexpected envelope: {:?}", other),
        }
        assert!(session.is_relaying());
    }

    #[test]
    fn test_upstream_text_wrapped_as_transcript_when_enabled() {
        let (mut session, _upstream) = relaying_audio_session(RelayConfig {
            decode_audio_in: false,
            wrap_upstream_text: true,
        });
        let mut client = RecordingSink::default();

        session.on_upstream_frame(Frame::Text("hello there".to_string()), &mut client);
        session.on_upstream_frame(Frame::Binary(vec![1, 2]), &mut client);

        assert_eq!(
            client.frames,
            vec![
                Frame::Text(r#"{"type":"transcript","data":"hello there"}"#.to_string()),
                Frame::Binary(vec![1, 2]),
            ]
        );
    }

    #[test]
    fn test_client_close_closes_upstream_exactly_once() {
        let (mut session, upstream) = relaying_audio_session(options());
        let mut client = RecordingSink::default();

        session.on_client_closed();
        session.on_client_closed();
        session.on_upstream_closed(&mut client);
        session.on_upstream_error(&mut client, &RelayError::UpstreamTransport("late".to_string()));

        assert_eq!(upstream.0.borrow().closes, vec![CloseFrame::client_disconnected()]);
        assert!(client.closes.is_empty());
        assert_eq!(session.state(), SessionState::Closed);

        let outcome = session.on_client_frame(Frame::Binary(vec![1]), &mut client);
        assert_eq!(outcome, ClientFrameOutcome::Dropped);
        assert!(upstream.0.borrow().frames.is_empty());
    }

    #[test]
    fn test_upstream_close_closes_client_gracefully() {
        let (mut session, upstream) = relaying_audio_session(options());
        let mut client = RecordingSink::default();

        session.on_upstream_closed(&mut client);
        session.on_client_closed();

        assert_eq!(client.closes, vec![CloseFrame::upstream_disconnected()]);
        assert!(upstream.0.borrow().closes.is_empty());
        assert!(session.is_closed());
    }

    #[test]
    fn test_upstream_error_closes_client_with_error_code() {
        let (mut session, upstream) = relaying_audio_session(options());
        let mut client = RecordingSink::default();

        session.on_upstream_error(&mut client, &RelayError::UpstreamTransport("reset".to_string()));
        session.on_upstream_error(&mut client, &RelayError::UpstreamTransport("again".to_string()));

        assert_eq!(client.closes, vec![CloseFrame::upstream_error()]);
        assert_eq!(upstream.0.borrow().closes.len(), 1);
        assert!(!session.on_upstream_frame(Frame::Binary(vec![1]), &mut client));
    }

    #[test]
    fn test_upstream_attached_after_client_left_is_closed() {
        let mut session: RelaySession<SharedSink> = RelaySession::new(SessionMode::Audio, options());
        session.begin_authentication().unwrap();
        session.authenticated("user-1".to_string()).unwrap();
        session.begin_upstream().unwrap();
        session.on_client_closed();

        let upstream = SharedSink::default();
        assert!(!session.attach_upstream(upstream.clone()));
        assert_eq!(upstream.0.borrow().closes, vec![CloseFrame::client_disconnected()]);
    }

    #[test]
    fn test_upstream_connect_failure_closes_client() {
        let mut session: RelaySession<SharedSink> = RelaySession::new(SessionMode::Audio, options());
        let mut client = RecordingSink::default();
        session.begin_authentication().unwrap();
        session.authenticated("user-1".to_string()).unwrap();
        session.begin_upstream().unwrap();

        session.upstream_connect_failed(&mut client, &RelayError::UpstreamConnect("refused".to_string()));

        assert_eq!(client.closes, vec![CloseFrame::upstream_error()]);
        assert!(session.is_closed());
    }

    #[test]
    fn test_chat_session_turns_text_into_queries() {
        let mut session: RelaySession<SharedSink> = RelaySession::new(SessionMode::Chat, options());
        let mut client = RecordingSink::default();
        session.begin_authentication().unwrap();
        session.authenticated("user-1".to_string()).unwrap();
        session.start_chat().unwrap();

        let outcome = session.on_client_frame(Frame::Text("   ".to_string()), &mut client);
        assert_eq!(outcome, ClientFrameOutcome::Query("   ".to_string()));

        let outcome = session.on_client_frame(Frame::Binary(vec![0]), &mut client);
        assert_eq!(outcome, ClientFrameOutcome::Dropped);
        assert_eq!(client.frames.len(), 1);
        assert!(session.is_relaying());
    }

    #[test]
    fn test_deliver_after_close_is_dropped() {
        let mut session: RelaySession<SharedSink> = RelaySession::new(SessionMode::Chat, options());
        let mut client = RecordingSink::default();
        session.begin_authentication().unwrap();
        session.authenticated("user-1".to_string()).unwrap();
        session.start_chat().unwrap();

        assert!(session.deliver(Envelope::GptResponse("first".to_string()), &mut client));
        session.on_client_closed();
        assert!(!session.deliver(Envelope::GptResponse("late".to_string()), &mut client));
        assert_eq!(client.frames.len(), 1);
    }
}
