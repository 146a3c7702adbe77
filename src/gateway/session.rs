use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::oneshot,
    time::{Instant, timeout},
};
use tracing::{debug, error, info, trace, warn};

use super::{
    Gateway,
    admission::AdmissionReason,
    registry::{CloseReason, SessionHandle},
};
use crate::{
    analytics::{CloseKind, Direction, Phase},
    auth::Identity,
    errors::{FailureKind, FrameError, HandshakeError, SessionError},
    inference::Prediction,
    quality::AdjustmentAction,
    transport::{CloseCode, Transport},
    wire::{
        self, AuthSuccess, ClientMessage, ErrorMessage, FrameBody, FramePayload, FrameResult,
        QualityNotice,
    },
};

// -----------------------------------------------------------------------------
// ----- Outcomes --------------------------------------------------------------

/// How a call to [`Gateway::serve`] finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// No concurrency slot within the admission timeout.
    Busy,
    /// Handshake refused; carries the failure label.
    Refused(&'static str),
    /// The session was registered and has now ended.
    Ended { client_id: String, end: SessionEnd },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    Stale,
    Shutdown,
    Failed,
}

impl SessionEnd {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEnd::PeerClosed => "peer_closed",
            SessionEnd::Stale => "stale",
            SessionEnd::Shutdown => "shutdown",
            SessionEnd::Failed => "failed",
        }
    }

    fn close_code(self) -> CloseCode {
        match self {
            SessionEnd::PeerClosed => CloseCode::Normal,
            SessionEnd::Stale | SessionEnd::Shutdown => CloseCode::GoingAway,
            SessionEnd::Failed => CloseCode::InternalError,
        }
    }
}

impl From<CloseReason> for SessionEnd {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Stale => SessionEnd::Stale,
            CloseReason::Shutdown => SessionEnd::Shutdown,
        }
    }
}

/// Result of waiting on a frame's inference.
enum Inferred {
    Done(Vec<Prediction>),
    Interrupted(CloseReason),
}

// -----------------------------------------------------------------------------
// ----- Gateway: Session ------------------------------------------------------

impl Gateway {
    /// Drive one connection from accept to close.
    pub async fn serve<T: Transport>(self: Arc<Self>, mut transport: T) -> SessionOutcome {
        let _slot = match self.admit_connection().await {
            Ok(slot) => slot,
            Err(decision) => {
                self.metrics.failure(FailureKind::ResourceExhausted);
                warn!(
                    reason = decision.reason.as_str(),
                    "no session slot free; refusing connection"
                );
                close_quietly(&mut transport, CloseCode::TryAgainLater, "server busy").await;
                return SessionOutcome::Busy;
            }
        };

        let handshake_started = Instant::now();
        let (handle, closer) = match self.handshake(&mut transport).await {
            Ok(registered) => registered,
            Err(e) => {
                let label = e.label();
                self.metrics.auth_failure(label);
                self.metrics.failure(e.kind());
                warn!(reason = label, "handshake failed: {e}");
                close_quietly(&mut transport, CloseCode::PolicyViolation, label).await;
                return SessionOutcome::Refused(label);
            }
        };
        self.metrics
            .latency(Phase::Handshake, handshake_started.elapsed());
        self.metrics.connection_opened();

        let client_id = handle.client_id().to_string();
        let serial = handle.serial();
        info!(client_id, serial, "session established");

        let end = match self.run(&mut transport, &handle, closer).await {
            Ok(end) => end,
            Err(e) => {
                self.metrics.failure(e.kind());
                error!(client_id, serial, "session failed: {e}");
                SessionEnd::Failed
            }
        };

        self.teardown(&mut transport, &handle, end).await;
        SessionOutcome::Ended { client_id, end }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Session Private ----------------------------------------------

impl Gateway {
    /// First message must be `{"type":"auth"}`; on success the session is
    /// registered and acknowledged.
    async fn handshake<T: Transport>(
        &self,
        transport: &mut T,
    ) -> Result<(Arc<SessionHandle>, oneshot::Receiver<CloseReason>), HandshakeError> {
        let frame_timeout = self.config.snapshot().frame_timeout;

        let message = match timeout(frame_timeout, transport.recv()).await {
            Err(_) => return Err(HandshakeError::Timeout),
            Ok(received) => received?.ok_or(HandshakeError::PeerClosed)?,
        };
        self.metrics.bytes(Direction::Inbound, message.len());

        let token = match wire::parse_inbound(message) {
            Ok(ClientMessage::Auth { token }) => token,
            _ => return Err(HandshakeError::InvalidMessage),
        };

        let identity: Identity = self.authenticator.authenticate(&token).await?;

        let (handle, closer) = self.registry.register(&identity.client_id).map_err(|_| {
            HandshakeError::AlreadyConnected {
                client_id: identity.client_id.clone(),
            }
        })?;

        if let Err(e) = self
            .send(transport, &AuthSuccess::new(&identity.client_id))
            .await
        {
            self.registry.unregister(&handle, |_| {});
            return Err(match e {
                SessionError::Transport(e) => HandshakeError::Transport(e),
                _ => HandshakeError::InvalidMessage,
            });
        }

        Ok((handle, closer))
    }

    async fn run<T: Transport>(
        &self,
        transport: &mut T,
        handle: &SessionHandle,
        mut closer: oneshot::Receiver<CloseReason>,
    ) -> Result<SessionEnd, SessionError> {
        loop {
            let frame_timeout = self.config.snapshot().frame_timeout;

            let read = tokio::select! {
                reason = &mut closer => {
                    return Ok(reason.map_or(SessionEnd::Shutdown, SessionEnd::from));
                }
                read = timeout(frame_timeout, transport.recv()) => read,
            };

            let message = match read {
                Err(_) => {
                    self.report_frame_error(transport, handle, FrameError::ReadTimeout(frame_timeout))
                        .await?;
                    continue;
                }
                Ok(received) => match received? {
                    Some(message) => message,
                    None => return Ok(SessionEnd::PeerClosed),
                },
            };
            self.metrics.bytes(Direction::Inbound, message.len());

            let payload = match wire::parse_inbound(message) {
                Ok(ClientMessage::Frame(payload)) => payload,
                Ok(ClientMessage::Auth { .. } | ClientMessage::Ignored) => {
                    trace!(client_id = handle.client_id(), "ignoring non-frame message");
                    continue;
                }
                Err(e) => return Err(SessionError::ProtocolViolation(e.to_string())),
            };

            if let Some(reason) = self
                .handle_frame(transport, handle, payload, &mut closer)
                .await?
            {
                return Ok(reason.into());
            }
        }
    }

    /// Admission, quality, inference and reply for one frame. Returns a close
    /// reason if the session was removed or signalled along the way.
    async fn handle_frame<T: Transport>(
        &self,
        transport: &mut T,
        handle: &SessionHandle,
        payload: FramePayload,
        closer: &mut oneshot::Receiver<CloseReason>,
    ) -> Result<Option<CloseReason>, SessionError> {
        let client_id = handle.client_id();
        let started = Instant::now();

        let Some(decision) = self.admit_frame(handle) else {
            // removed by the reaper or shutdown; its close signal is on the way
            return Ok(Some(closer.await.unwrap_or(CloseReason::Shutdown)));
        };
        let decision = decision?;
        if !decision.allowed {
            self.metrics.failure(FailureKind::AdmissionRejected);
            if decision.reason == AdmissionReason::Bandwidth {
                // shrink the next reservation instead of retrying at the same rate
                self.quality.force_downgrade(client_id, 1);
            }
            return Ok(None);
        }
        handle.touch();

        if let Some(stats) = payload.stats {
            if let Some(action) = self.quality.adjust(client_id, &stats) {
                self.send_quality_notice(transport, &action).await?;
            }
        }

        match self.infer_frame(payload.body, closer).await {
            Ok(Inferred::Done(predictions)) => {
                self.send(transport, &FrameResult::new(&predictions)).await?;
                self.metrics.latency(Phase::Frame, started.elapsed());
                Ok(None)
            }
            Ok(Inferred::Interrupted(reason)) => Ok(Some(reason)),
            Err(e) => {
                self.report_frame_error(transport, handle, e).await?;
                Ok(None)
            }
        }
    }

    async fn infer_frame(
        &self,
        body: FrameBody,
        closer: &mut oneshot::Receiver<CloseReason>,
    ) -> Result<Inferred, FrameError> {
        let limits = self.config.snapshot();

        let decode_started = Instant::now();
        let frame: Bytes = body.decode()?;
        wire::validate_frame(&frame, limits.max_frame_size)?;
        self.metrics.latency(Phase::Decode, decode_started.elapsed());

        let pipeline = self
            .pipelines
            .get(&limits.pipeline)
            .ok_or_else(|| FrameError::NoPipeline(limits.pipeline.clone()))?;

        let inference_started = Instant::now();
        // dropping the handle detaches the task; its result is then discarded
        let mut task = tokio::spawn(async move { pipeline.infer(frame).await });

        let joined = tokio::select! {
            reason = &mut *closer => {
                return Ok(Inferred::Interrupted(reason.unwrap_or(CloseReason::Shutdown)));
            }
            joined = timeout(limits.inference_timeout, &mut task) => joined,
        };

        let predictions = match joined {
            Err(_) => return Err(FrameError::InferenceTimeout(limits.inference_timeout)),
            Ok(Err(_)) => return Err(FrameError::InferenceAborted),
            Ok(Ok(result)) => result?,
        };
        self.metrics
            .latency(Phase::Inference, inference_started.elapsed());

        Ok(Inferred::Done(predictions))
    }

    async fn report_frame_error<T: Transport>(
        &self,
        transport: &mut T,
        handle: &SessionHandle,
        error: FrameError,
    ) -> Result<(), SessionError> {
        self.metrics.failure(error.kind());
        debug!(
            client_id = handle.client_id(),
            serial = handle.serial(),
            "frame failed: {error}"
        );
        self.send(transport, &ErrorMessage::new(error.to_string()))
            .await
    }

    async fn send_quality_notice<T: Transport>(
        &self,
        transport: &mut T,
        action: &AdjustmentAction,
    ) -> Result<(), SessionError> {
        self.send(transport, &QualityNotice::from(action)).await
    }

    async fn send<T: Transport, M: Serialize + Sync>(
        &self,
        transport: &mut T,
        message: &M,
    ) -> Result<(), SessionError> {
        let text = wire::encode(message)?;
        self.metrics.bytes(Direction::Outbound, text.len());
        transport.send_text(text).await?;
        Ok(())
    }

    async fn teardown<T: Transport>(&self, transport: &mut T, handle: &SessionHandle, end: SessionEnd) {
        // whoever removes the entry releases the reservation
        self.registry.unregister(handle, |handle| {
            self.bandwidth.release(handle.client_id());
        });

        close_quietly(transport, end.close_code(), end.as_str()).await;

        let close_kind = match end {
            SessionEnd::Stale => CloseKind::Stale,
            _ => CloseKind::Normal,
        };
        let lifetime = handle.established_at().elapsed();
        self.metrics.connection_closed();
        self.metrics.connection_duration(close_kind, lifetime);

        info!(
            client_id = handle.client_id(),
            serial = handle.serial(),
            end = end.as_str(),
            "session closed after {lifetime:?}"
        );
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

async fn close_quietly<T: Transport>(transport: &mut T, code: CloseCode, reason: &str) {
    if let Err(e) = transport.close(code, reason).await {
        debug!("close failed: {e}");
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
