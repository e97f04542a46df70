//! # Streaming Session State Machine
//!
//! Runs one `/ws/stream` connection from token check to close. The session is a
//! plain async task that owns all of its state (buffer, scheduler, parameters)
//! and talks to the socket only through two channels, so it can be driven by a
//! real WebSocket actor or directly by tests.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: Socket upgraded
//! 2. **Authenticating**: Query token compared to the expected credential
//! 3. **AwaitingInit**: Waiting (bounded) for the JSON init payload
//! 4. **Streaming**: Receiving PCM, analyzing each window boundary as it is crossed
//! 5. **Closing / Closed**: Normal termination (timeout, client close, rejection)
//! 6. **Failed**: I/O or inference failure reported to the client
//!
//! ## Ordering:
//! Receive, buffer, schedule and inference are strictly sequential. Inference for
//! window *k* finishes and its result is queued before the next frame is read, so
//! results leave in boundary order and a fast sender is throttled by the bounded
//! inbound channel.

use crate::audio::buffer::FrameBuffer;
use crate::audio::format::PcmFormat;
use crate::audio::protocol::{ClientInit, InitDefaults, InitError, Inbound, Outbound, ServerMessage, SessionParams};
use crate::audio::window::WindowScheduler;
use crate::config::StreamConfig;
use crate::detection::{sort_by_confidence, AnalysisParams, Detection, DetectionError, WindowAnalyzer};
use actix_web_actors::ws::CloseCode;
use chrono::Utc;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    AwaitingInit,
    Streaming,
    Closing,
    Closed,
    /// Absorbing failure state, reachable from any non-terminal state
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::AwaitingInit => "awaiting_init",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// Why a session ended.
///
/// Only `Io` and `Inference` are failures; the rest are expected ways for a
/// session to end, each with its own close behavior.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Token missing or different from the expected credential
    #[error("credential missing or invalid")]
    Auth,

    /// No init payload arrived in time
    #[error("no init payload within {0:?}")]
    InitTimeout(Duration),

    /// Init payload arrived but was rejected
    #[error("invalid init payload: {0}")]
    Protocol(#[from] InitError),

    /// Session budget used up (normal termination)
    #[error("session timeout of {0:?} reached")]
    Timeout(Duration),

    /// Temp audio artifact could not be written or read
    #[error(transparent)]
    Io(DetectionError),

    /// The detection engine failed on a window
    #[error(transparent)]
    Inference(DetectionError),

    /// Client closed the connection or the transport dropped
    #[error("client disconnected")]
    Transport,
}

impl From<DetectionError> for SessionError {
    fn from(err: DetectionError) -> Self {
        if err.is_io() {
            SessionError::Io(err)
        } else {
            SessionError::Inference(err)
        }
    }
}

impl SessionError {
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionError::Io(_) | SessionError::Inference(_))
    }

    /// JSON message to send before closing, if any.
    pub fn client_message(&self) -> Option<ServerMessage> {
        match self {
            SessionError::Protocol(_) => Some(ServerMessage::invalid_init()),
            SessionError::Timeout(_) => Some(ServerMessage::Timeout(true)),
            SessionError::Io(_) | SessionError::Inference(_) => Some(ServerMessage::Error(self.to_string())),
            SessionError::Auth | SessionError::InitTimeout(_) | SessionError::Transport => None,
        }
    }

    /// Close code to send, or `None` when the transport is already gone.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            SessionError::Auth | SessionError::InitTimeout(_) | SessionError::Protocol(_) => Some(CloseCode::Policy),
            SessionError::Timeout(_) => Some(CloseCode::Normal),
            SessionError::Io(_) | SessionError::Inference(_) => Some(CloseCode::Error),
            SessionError::Transport => None,
        }
    }
}

/// Per-session constants derived from the `[stream]` config section.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub format: PcmFormat,
    pub window_bytes: usize,
    pub init_timeout: Duration,
    pub poll_interval: Duration,
    pub defaults: InitDefaults,
}

impl StreamSettings {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            format: config.pcm_format(),
            window_bytes: config.window_bytes(),
            init_timeout: config.init_timeout(),
            poll_interval: config.poll_interval(),
            defaults: InitDefaults {
                min_conf: config.default_min_confidence,
                timeout: Duration::from_secs_f64(config.default_timeout_secs),
                min_timeout: Duration::from_secs_f64(config.min_timeout_secs),
            },
        }
    }
}

/// Summary of a finished session, for logging and tests.
#[derive(Debug)]
pub struct SessionReport {
    /// `Closed` or `Failed`
    pub state: SessionState,
    pub reason: SessionError,
    pub bytes_received: usize,
    pub windows_analyzed: usize,
}

/// One streaming session. Consumed by `run`.
pub struct StreamSession {
    analyzer: Arc<dyn WindowAnalyzer>,
    settings: StreamSettings,
    expected_token: String,
    state: SessionState,
    buffer: FrameBuffer,
    scheduler: WindowScheduler,
}

impl StreamSession {
    pub fn new(analyzer: Arc<dyn WindowAnalyzer>, settings: StreamSettings, expected_token: impl Into<String>) -> Self {
        let scheduler = WindowScheduler::new(settings.window_bytes);
        Self {
            analyzer,
            settings,
            expected_token: expected_token.into(),
            state: SessionState::Connecting,
            buffer: FrameBuffer::new(),
            scheduler,
        }
    }

    /// Drive the session until it ends.
    ///
    /// ## Parameters:
    /// - **token**: Credential from the connection query string
    /// - **inbound**: Frames from the client, in arrival order. `None` or
    ///   `Inbound::Close` means the client is gone.
    /// - **outbound**: Messages and the final close for the client
    pub async fn run(
        mut self,
        token: Option<String>,
        mut inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> SessionReport {
        self.transition(SessionState::Authenticating);

        let reason = match self.handshake(token.as_deref(), &mut inbound).await {
            Ok(params) => self.stream(params, &mut inbound, &outbound).await,
            Err(reason) => reason,
        };

        self.finish(reason, &outbound)
    }

    /// Token check and init payload.
    async fn handshake(
        &mut self,
        token: Option<&str>,
        inbound: &mut mpsc::Receiver<Inbound>,
    ) -> Result<SessionParams, SessionError> {
        if token != Some(self.expected_token.as_str()) {
            return Err(SessionError::Auth);
        }
        self.transition(SessionState::AwaitingInit);

        let init_timeout = self.settings.init_timeout;
        let frame = match timeout(init_timeout, inbound.recv()).await {
            Err(_) => return Err(SessionError::InitTimeout(init_timeout)),
            Ok(None) | Ok(Some(Inbound::Close)) => return Err(SessionError::Transport),
            Ok(Some(frame)) => frame,
        };

        let init = match &frame {
            Inbound::Text(text) => ClientInit::parse(text.as_bytes())?,
            Inbound::Binary(data) => ClientInit::parse(data)?,
            Inbound::Close => return Err(SessionError::Transport),
        };
        let params = init.validate(&self.settings.defaults, Utc::now().date_naive())?;

        info!(
            lat = params.analysis.lat,
            lon = params.analysis.lon,
            date = %params.analysis.date,
            min_conf = params.analysis.min_conf,
            timeout_secs = params.timeout.as_secs_f64(),
            "Stream session initialized"
        );
        Ok(params)
    }

    /// Receive loop. Always ends with a reason; never returns early on success.
    async fn stream(
        &mut self,
        params: SessionParams,
        inbound: &mut mpsc::Receiver<Inbound>,
        outbound: &mpsc::UnboundedSender<Outbound>,
    ) -> SessionError {
        self.transition(SessionState::Streaming);
        let started = Instant::now();

        loop {
            let elapsed = started.elapsed();
            if elapsed >= params.timeout {
                return SessionError::Timeout(params.timeout);
            }

            // Never sleep past the session deadline.
            let wait = self.settings.poll_interval.min(params.timeout - elapsed);
            let chunk = match timeout(wait, inbound.recv()).await {
                Err(_) => continue,
                Ok(None) | Ok(Some(Inbound::Close)) => return SessionError::Transport,
                Ok(Some(Inbound::Text(text))) => {
                    warn!(len = text.len(), "Ignoring text frame while streaming");
                    continue;
                }
                Ok(Some(Inbound::Binary(chunk))) => chunk,
            };

            self.buffer.append(&chunk);
            debug!(
                received = chunk.len(),
                total = self.buffer.len(),
                buffered_secs = self.buffer.duration_seconds(&self.settings.format),
                next_window_at = self.scheduler.next_threshold(),
                "Received audio chunk"
            );

            while let Some(window) = self.scheduler.check(self.buffer.len()) {
                let detections = match self.analyze_window(window, &params.analysis).await {
                    Ok(detections) => detections,
                    Err(err) => return err.into(),
                };

                if outbound.is_closed() {
                    return SessionError::Transport;
                }
                let _ = outbound.send(Outbound::Message(ServerMessage::Detections(detections)));
            }
        }
    }

    /// Run inference over `window` on the blocking pool and sort the result.
    async fn analyze_window(
        &self,
        window: Range<usize>,
        params: &AnalysisParams,
    ) -> Result<Vec<Detection>, DetectionError> {
        let index = self.scheduler.fired();
        debug!(window = index, bytes = window.end, "Launching window analysis");

        let analyzer = Arc::clone(&self.analyzer);
        let pcm = self.buffer.prefix(window.end).to_vec();
        let format = self.settings.format;
        let params = params.clone();

        let mut detections = tokio::task::spawn_blocking(move || analyzer.analyze(&pcm, &format, &params))
            .await
            .map_err(|e| DetectionError::Worker(e.to_string()))??;

        sort_by_confidence(&mut detections);
        debug!(window = index, detections = detections.len(), "Window analyzed");
        for detection in &detections {
            debug!(species = %detection.scientific_name, confidence = detection.confidence, "Detection");
        }
        Ok(detections)
    }

    /// Send the closing message and close code for `reason`, best effort.
    fn finish(mut self, reason: SessionError, outbound: &mpsc::UnboundedSender<Outbound>) -> SessionReport {
        if reason.close_code().is_some() {
            self.transition(SessionState::Closing);
        }

        if let Some(message) = reason.client_message() {
            let _ = outbound.send(Outbound::Message(message));
        }
        if let Some(code) = reason.close_code() {
            let _ = outbound.send(Outbound::Close(code));
        }

        if self.buffer.is_empty() {
            debug!("Session ended before any audio arrived");
        }

        let state = if reason.is_failure() {
            warn!(error = %reason, "Stream session failed");
            SessionState::Failed
        } else {
            info!(reason = %reason, "Stream session ended");
            SessionState::Closed
        };
        self.transition(state);

        SessionReport {
            state,
            reason,
            bytes_received: self.buffer.len(),
            windows_analyzed: self.scheduler.fired(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            return;
        }
        debug!(from = self.state.as_str(), to = next.as_str(), "Session state change");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::detection::test_support::detection;
    use actix_web::web::Bytes;
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    const TOKEN: &str = "s3cret";
    const WINDOW: usize = 288_000;

    /// Analyzer that records every window length and can fail on one call.
    struct MockAnalyzer {
        calls: Mutex<Vec<usize>>,
        fail_on: Option<usize>,
        io_failure: bool,
    }

    impl MockAnalyzer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_on: None,
                io_failure: false,
            })
        }

        fn failing_on(call: usize, io_failure: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_on: Some(call),
                io_failure,
            })
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl WindowAnalyzer for MockAnalyzer {
        fn analyze(&self, pcm: &[u8], _format: &PcmFormat, _params: &AnalysisParams) -> Result<Vec<Detection>, DetectionError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(pcm.len());
                calls.len()
            };

            // Every window must be the untouched prefix of the stream.
            assert!(pcm.iter().enumerate().all(|(i, b)| *b == (i % 251) as u8));

            if self.fail_on == Some(call) {
                if self.io_failure {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
                }
                return Err(DetectionError::Engine("model crashed".to_string()));
            }
            // Deliberately unsorted
            Ok(vec![
                detection(&format!("low-{}", call), 0.3),
                detection(&format!("high-{}", call), 0.9),
            ])
        }
    }

    struct Harness {
        tx: mpsc::Sender<Inbound>,
        rx: mpsc::UnboundedReceiver<Outbound>,
        handle: JoinHandle<SessionReport>,
        sent: usize,
    }

    impl Harness {
        fn start(analyzer: Arc<MockAnalyzer>, token: Option<&str>) -> Self {
            let settings = StreamSettings::from_config(&AppConfig::default().stream);
            let session = StreamSession::new(analyzer, settings, TOKEN);
            let (tx, inbound) = mpsc::channel(4);
            let (outbound, rx) = mpsc::unbounded_channel();
            let handle = tokio::spawn(session.run(token.map(str::to_string), inbound, outbound));
            Self { tx, rx, handle, sent: 0 }
        }

        // Sends are best effort: a rejected session may already be gone.
        async fn init(&self, json: &str) {
            let _ = self.tx.send(Inbound::Text(json.to_string())).await;
        }

        /// Send `len` bytes continuing the `i % 251` pattern.
        async fn audio(&mut self, len: usize) {
            let chunk: Vec<u8> = (self.sent..self.sent + len).map(|i| (i % 251) as u8).collect();
            self.sent += len;
            let _ = self.tx.send(Inbound::Binary(Bytes::from(chunk))).await;
        }

        async fn next(&mut self) -> Option<Outbound> {
            self.rx.recv().await
        }

        /// Disconnect and collect everything the session sent afterwards.
        async fn disconnect(self) -> (SessionReport, Vec<Outbound>) {
            let Harness { tx, mut rx, handle, .. } = self;
            drop(tx);
            let report = handle.await.unwrap();
            let mut rest = Vec::new();
            while let Ok(message) = rx.try_recv() {
                rest.push(message);
            }
            (report, rest)
        }
    }

    fn detections_of(message: Option<Outbound>) -> Vec<Detection> {
        match message {
            Some(Outbound::Message(ServerMessage::Detections(detections))) => detections,
            other => panic!("expected detections, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_token_closes_with_policy_violation() {
        let analyzer = MockAnalyzer::new();
        let harness = Harness::start(analyzer.clone(), Some("wrong"));
        harness.init(r#"{"lat": 1, "lon": 2}"#).await;

        let (report, sent) = harness.disconnect().await;

        assert!(matches!(report.reason, SessionError::Auth));
        assert_eq!(report.state, SessionState::Closed);
        assert_eq!(sent, vec![Outbound::Close(CloseCode::Policy)]);
        assert!(analyzer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let harness = Harness::start(MockAnalyzer::new(), None);
        let (report, sent) = harness.disconnect().await;

        assert!(matches!(report.reason, SessionError::Auth));
        assert_eq!(sent, vec![Outbound::Close(CloseCode::Policy)]);
    }

    #[tokio::test]
    async fn test_init_without_lon_is_rejected() {
        let analyzer = MockAnalyzer::new();
        let mut harness = Harness::start(analyzer.clone(), Some(TOKEN));
        harness.init(r#"{"lat": 10.0}"#).await;
        harness.audio(WINDOW).await;

        assert_eq!(
            harness.next().await,
            Some(Outbound::Message(ServerMessage::Error("Invalid init payload".to_string())))
        );
        assert_eq!(harness.next().await, Some(Outbound::Close(CloseCode::Policy)));

        let (report, rest) = harness.disconnect().await;
        assert!(matches!(report.reason, SessionError::Protocol(_)));
        assert!(rest.is_empty());
        assert_eq!(report.bytes_received, 0);
        assert!(analyzer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_accepted_as_binary_json() {
        let analyzer = MockAnalyzer::new();
        let mut harness = Harness::start(analyzer.clone(), Some(TOKEN));
        harness
            .tx
            .send(Inbound::Binary(Bytes::from_static(br#"{"lat": 10.0, "lon": 20.0}"#)))
            .await
            .unwrap();
        harness.audio(WINDOW).await;

        assert_eq!(detections_of(harness.next().await).len(), 2);
        let (report, _) = harness.disconnect().await;
        assert_eq!(report.windows_analyzed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_timeout_closes_without_payload() {
        let harness = Harness::start(MockAnalyzer::new(), Some(TOKEN));

        // Keep the sender alive so only the timer can end the wait.
        let Harness { tx, mut rx, handle, .. } = harness;
        let report = handle.await.unwrap();
        drop(tx);

        assert!(matches!(report.reason, SessionError::InitTimeout(d) if d == Duration::from_secs(10)));
        assert_eq!(rx.recv().await, Some(Outbound::Close(CloseCode::Policy)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_session_times_out_once() {
        let analyzer = MockAnalyzer::new();
        let harness = Harness::start(analyzer.clone(), Some(TOKEN));
        harness.init(r#"{"lat": 0, "lon": 0, "timeout": 2.5}"#).await;

        let Harness { tx, mut rx, handle, .. } = harness;
        let started = Instant::now();
        let report = handle.await.unwrap();
        drop(tx);

        assert!(started.elapsed() >= Duration::from_millis(2_500));
        assert!(started.elapsed() < Duration::from_millis(3_500));
        assert!(matches!(report.reason, SessionError::Timeout(_)));
        assert_eq!(report.state, SessionState::Closed);
        assert_eq!(rx.recv().await, Some(Outbound::Message(ServerMessage::Timeout(true))));
        assert_eq!(rx.recv().await, Some(Outbound::Close(CloseCode::Normal)));
        assert_eq!(rx.recv().await, None);
        assert!(analyzer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_large_chunk_fires_two_windows_in_order() {
        let analyzer = MockAnalyzer::new();
        let mut harness = Harness::start(analyzer.clone(), Some(TOKEN));
        harness.init(r#"{"lat": 60.44, "lon": 22.26}"#).await;
        harness.audio(600_000).await;

        let first = detections_of(harness.next().await);
        let second = detections_of(harness.next().await);
        assert_eq!(first[0].scientific_name, "high-1");
        assert_eq!(second[0].scientific_name, "high-2");
        assert_eq!(analyzer.calls(), vec![288_000, 576_000]);

        let (report, rest) = harness.disconnect().await;
        assert!(rest.is_empty());
        assert_eq!(report.bytes_received, 600_000);
        assert_eq!(report.windows_analyzed, 2);
    }

    #[tokio::test]
    async fn test_detections_sorted_by_confidence() {
        let mut harness = Harness::start(MockAnalyzer::new(), Some(TOKEN));
        harness.init(r#"{"lat": 0, "lon": 0}"#).await;
        harness.audio(WINDOW).await;

        let detections = detections_of(harness.next().await);
        let confidences: Vec<f64> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.3]);
    }

    #[tokio::test]
    async fn test_window_count_follows_cumulative_bytes() {
        let analyzer = MockAnalyzer::new();
        let mut harness = Harness::start(analyzer.clone(), Some(TOKEN));
        harness.init(r#"{"lat": 0, "lon": 0}"#).await;

        let chunks = [1, 95_999, 200_000, 7, 287_993, 48_000, 300_000, 12_345];
        let total: usize = chunks.iter().sum();
        for len in chunks {
            harness.audio(len).await;
        }
        for _ in 0..total / WINDOW {
            detections_of(harness.next().await);
        }

        let (report, rest) = harness.disconnect().await;
        assert!(rest.is_empty());
        let expected: Vec<usize> = (1..=total / WINDOW).map(|i| i * WINDOW).collect();
        assert_eq!(analyzer.calls(), expected);
        assert_eq!(report.windows_analyzed, total / WINDOW);
    }

    #[tokio::test]
    async fn test_failure_on_second_window_stops_session() {
        let analyzer = MockAnalyzer::failing_on(2, false);
        let mut harness = Harness::start(analyzer.clone(), Some(TOKEN));
        harness.init(r#"{"lat": 0, "lon": 0}"#).await;
        harness.audio(600_000).await;
        harness.audio(WINDOW).await;

        assert_eq!(detections_of(harness.next().await).len(), 2);
        match harness.next().await {
            Some(Outbound::Message(ServerMessage::Error(message))) => assert!(message.contains("model crashed")),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(harness.next().await, Some(Outbound::Close(CloseCode::Error)));

        let (report, rest) = harness.disconnect().await;
        assert!(rest.is_empty());
        assert_eq!(report.state, SessionState::Failed);
        assert!(matches!(report.reason, SessionError::Inference(_)));
        assert_eq!(analyzer.calls(), vec![288_000, 576_000]);
    }

    #[tokio::test]
    async fn test_io_failure_reported_as_io_error() {
        let mut harness = Harness::start(MockAnalyzer::failing_on(1, true), Some(TOKEN));
        harness.init(r#"{"lat": 0, "lon": 0}"#).await;
        harness.audio(WINDOW).await;

        assert_eq!(
            harness.next().await,
            Some(Outbound::Message(ServerMessage::Error("I/O error: disk full".to_string())))
        );
        assert_eq!(harness.next().await, Some(Outbound::Close(CloseCode::Error)));
    }

    #[tokio::test]
    async fn test_disconnect_ends_silently() {
        let analyzer = MockAnalyzer::new();
        let mut harness = Harness::start(analyzer.clone(), Some(TOKEN));
        harness.init(r#"{"lat": 0, "lon": 0}"#).await;
        harness.audio(100_000).await;

        let (report, sent) = harness.disconnect().await;

        assert!(sent.is_empty());
        assert!(matches!(report.reason, SessionError::Transport));
        assert_eq!(report.state, SessionState::Closed);
        assert!(analyzer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_text_frames_ignored_while_streaming() {
        let analyzer = MockAnalyzer::new();
        let mut harness = Harness::start(analyzer.clone(), Some(TOKEN));
        harness.init(r#"{"lat": 0, "lon": 0}"#).await;
        harness.tx.send(Inbound::Text("hello".to_string())).await.unwrap();
        harness.audio(WINDOW).await;

        detections_of(harness.next().await);
        assert_eq!(analyzer.calls(), vec![WINDOW]);
    }

    #[test]
    fn test_error_close_mapping() {
        assert_eq!(SessionError::Auth.close_code(), Some(CloseCode::Policy));
        assert_eq!(SessionError::Timeout(Duration::from_secs(1)).close_code(), Some(CloseCode::Normal));
        assert_eq!(SessionError::Transport.close_code(), None);
        assert!(SessionError::Transport.client_message().is_none());

        let io: SessionError = DetectionError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).into();
        assert!(matches!(io, SessionError::Io(_)));
        let engine: SessionError = DetectionError::Engine("x".into()).into();
        assert!(matches!(engine, SessionError::Inference(_)));
    }
}
