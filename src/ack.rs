//! Acknowledgement orchestration for received messages.
//!
//! Once a received message has been handled, exactly one
//! [`AcknowledgementOrchestrator::acknowledge`] call decides what goes back
//! to the peer and what happens to the connection around it. The walk is an
//! explicit state machine:
//!
//! ```text
//! BeforeSendCheck -> AckResolution -> Send -> AfterSendCheck -> Done
//! ```
//!
//! A before-send directive short-circuits straight to `Done` without
//! sending anything. A failed send is recorded on the outcome rather than
//! returned, so the after-send directive still runs.

use std::fmt;

use bytes::Bytes;
use log::{debug, warn};

use crate::{
    connection::{MllpConnection, Transport},
    error::{MllpError, Role},
    hl7::{AcknowledgementCode, PrintFriendly, find_acknowledgement_code, generate_acknowledgement},
    writer::MllpSocketWriter,
};

/// Teardown applied to a connection around an acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownAction {
    /// Abort the connection.
    Reset,
    /// Shut the connection down in an orderly fashion.
    Close,
}

impl TeardownAction {
    async fn apply<T: Transport>(self, conn: &mut MllpConnection<T>) {
        match self {
            Self::Reset => conn.reset().await,
            Self::Close => conn.close().await,
        }
    }
}

/// What to do with the connection around the acknowledgement of one unit of
/// work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionDirective {
    /// Leave the connection open.
    #[default]
    Keep,
    /// Reset without acknowledging.
    ResetBeforeSend,
    /// Close without acknowledging.
    CloseBeforeSend,
    /// Acknowledge, then reset.
    ResetAfterSend,
    /// Acknowledge, then close.
    CloseAfterSend,
}

impl ConnectionDirective {
    /// Collapse the four independent flags into one directive.
    ///
    /// Before-send flags take precedence over after-send flags, and within
    /// each pair reset takes precedence over close.
    ///
    /// # Examples
    ///
    /// ```
    /// use mllp::ack::ConnectionDirective;
    ///
    /// assert_eq!(
    ///     ConnectionDirective::from_flags(false, true, true, false),
    ///     ConnectionDirective::CloseBeforeSend
    /// );
    /// assert_eq!(
    ///     ConnectionDirective::from_flags(false, false, true, true),
    ///     ConnectionDirective::ResetAfterSend
    /// );
    /// ```
    #[must_use]
    pub fn from_flags(
        reset_before_send: bool,
        close_before_send: bool,
        reset_after_send: bool,
        close_after_send: bool,
    ) -> Self {
        if reset_before_send {
            Self::ResetBeforeSend
        } else if close_before_send {
            Self::CloseBeforeSend
        } else if reset_after_send {
            Self::ResetAfterSend
        } else if close_after_send {
            Self::CloseAfterSend
        } else {
            Self::Keep
        }
    }

    /// Teardown to apply instead of sending.
    #[must_use]
    pub fn before_send(self) -> Option<TeardownAction> {
        match self {
            Self::ResetBeforeSend => Some(TeardownAction::Reset),
            Self::CloseBeforeSend => Some(TeardownAction::Close),
            _ => None,
        }
    }

    /// Teardown to apply after sending.
    #[must_use]
    pub fn after_send(self) -> Option<TeardownAction> {
        match self {
            Self::ResetAfterSend => Some(TeardownAction::Reset),
            Self::CloseAfterSend => Some(TeardownAction::Close),
            _ => None,
        }
    }
}

/// Everything the orchestrator needs to know about one received message.
#[derive(Clone, Debug)]
pub struct UnitOfWork {
    message: Bytes,
    acknowledgement: Option<Bytes>,
    expected_code: Option<AcknowledgementCode>,
    msa_text: Option<String>,
    auto_ack: bool,
    processing_error: Option<String>,
    directive: ConnectionDirective,
}

impl UnitOfWork {
    /// Start a unit of work for `message` with automatic acknowledgement
    /// enabled.
    #[must_use]
    pub fn new(message: Bytes) -> Self {
        Self {
            message,
            acknowledgement: None,
            expected_code: None,
            msa_text: None,
            auto_ack: true,
            processing_error: None,
            directive: ConnectionDirective::Keep,
        }
    }

    /// Send these bytes verbatim instead of synthesising an acknowledgement.
    #[must_use]
    pub fn acknowledgement(mut self, ack: Option<Bytes>) -> Self {
        self.acknowledgement = ack;
        self
    }

    /// Code to synthesise, or the code a supplied acknowledgement is
    /// expected to carry.
    #[must_use]
    pub fn expected_code(mut self, code: Option<AcknowledgementCode>) -> Self {
        self.expected_code = code;
        self
    }

    /// Text for MSA-3 of a synthesised acknowledgement.
    #[must_use]
    pub fn msa_text(mut self, text: Option<String>) -> Self {
        self.msa_text = text;
        self
    }

    /// Enable or disable synthesis when no acknowledgement is supplied.
    #[must_use]
    pub fn auto_ack(mut self, enabled: bool) -> Self {
        self.auto_ack = enabled;
        self
    }

    /// Record that handling the message failed.
    #[must_use]
    pub fn processing_error(mut self, error: Option<impl fmt::Display>) -> Self {
        self.processing_error = error.map(|e| e.to_string());
        self
    }

    /// Set the connection directive.
    #[must_use]
    pub fn directive(mut self, directive: ConnectionDirective) -> Self {
        self.directive = directive;
        self
    }

    /// The message being acknowledged.
    #[must_use]
    pub fn message(&self) -> &Bytes { &self.message }

    /// The recorded processing error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> { self.processing_error.as_deref() }
}

/// States of the acknowledgement walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcknowledgementState {
    /// Apply a before-send directive.
    BeforeSendCheck,
    /// Choose or build the acknowledgement.
    AckResolution,
    /// Write the acknowledgement.
    Send,
    /// Apply an after-send directive.
    AfterSendCheck,
    /// Finished.
    Done,
}

/// Result of one acknowledgement walk.
#[derive(Debug)]
pub struct AcknowledgementOutcome {
    /// States visited, in order, ending with [`AcknowledgementState::Done`].
    pub states: Vec<AcknowledgementState>,
    /// The acknowledgement that was sent or attempted.
    pub acknowledgement: Option<Bytes>,
    /// Its MSA-1 code, when recognised.
    pub code: Option<AcknowledgementCode>,
    /// Write failure recorded during [`AcknowledgementState::Send`].
    pub delivery_failure: Option<MllpError>,
    /// Teardown applied to the connection.
    pub action: Option<TeardownAction>,
}

impl AcknowledgementOutcome {
    fn new() -> Self {
        Self {
            states: Vec::with_capacity(5),
            acknowledgement: None,
            code: None,
            delivery_failure: None,
            action: None,
        }
    }

    /// `true` when an acknowledgement reached the transport.
    #[must_use]
    pub fn delivered(&self) -> bool {
        self.acknowledgement.is_some() && self.delivery_failure.is_none()
    }

    /// Final state reached.
    #[must_use]
    pub fn state(&self) -> AcknowledgementState {
        self.states
            .last()
            .copied()
            .unwrap_or(AcknowledgementState::BeforeSendCheck)
    }
}

/// Drives [`UnitOfWork`]s through the acknowledgement state machine.
#[derive(Debug)]
pub struct AcknowledgementOrchestrator {
    writer: MllpSocketWriter,
}

impl Default for AcknowledgementOrchestrator {
    fn default() -> Self { Self::new(MllpSocketWriter::new(Role::Acknowledgement)) }
}

impl AcknowledgementOrchestrator {
    /// Use `writer` to send acknowledgements.
    #[must_use]
    pub fn new(writer: MllpSocketWriter) -> Self { Self { writer } }

    /// Acknowledge one unit of work on `conn`.
    ///
    /// # Errors
    ///
    /// [`MllpError::InvalidAcknowledgement`] when no acknowledgement was
    /// supplied and synthesis is disabled (the after-send directive still
    /// runs), and [`MllpError::AcknowledgementGeneration`] when the message
    /// is too malformed to acknowledge. Write failures are not errors; see
    /// [`AcknowledgementOutcome::delivery_failure`].
    pub async fn acknowledge<T: Transport>(
        &mut self,
        conn: &mut MllpConnection<T>,
        work: UnitOfWork,
    ) -> Result<AcknowledgementOutcome, MllpError> {
        let mut outcome = AcknowledgementOutcome::new();

        outcome.states.push(AcknowledgementState::BeforeSendCheck);
        if let Some(action) = work.directive.before_send() {
            debug!(
                "skipping acknowledgement: address={}, action={action:?}",
                conn.address()
            );
            action.apply(conn).await;
            outcome.action = Some(action);
            outcome.states.push(AcknowledgementState::Done);
            return Ok(outcome);
        }

        outcome.states.push(AcknowledgementState::AckResolution);
        let (ack, code) = if let Some(ack) = work.acknowledgement.clone() {
            let code = classify(&ack, work.expected_code);
            (ack, code)
        } else if work.auto_ack {
            let code = work.expected_code.unwrap_or(if work.processing_error.is_some() {
                AcknowledgementCode::AE
            } else {
                AcknowledgementCode::AA
            });
            let text = work.msa_text.as_deref().or(work.processing_error.as_deref());
            let ack = generate_acknowledgement(&work.message, code, text)?;
            (ack, Some(code))
        } else {
            let err = MllpError::InvalidAcknowledgement {
                message: "automatic acknowledgement is disabled and no acknowledgement was \
                          supplied"
                    .to_owned(),
                payload: work.message.clone(),
                acknowledgement: None,
            };
            self.after_send(conn, work.directive, &mut outcome).await;
            return Err(err);
        };

        outcome.states.push(AcknowledgementState::Send);
        if let Err(err) = self.writer.write(conn, &ack).await {
            warn!(
                "acknowledgement delivery failed: address={}, error={err}, acknowledgement={}",
                conn.address(),
                PrintFriendly(&ack)
            );
            outcome.delivery_failure = Some(err);
        }
        outcome.acknowledgement = Some(ack);
        outcome.code = code;

        self.after_send(conn, work.directive, &mut outcome).await;
        Ok(outcome)
    }

    async fn after_send<T: Transport>(
        &self,
        conn: &mut MllpConnection<T>,
        directive: ConnectionDirective,
        outcome: &mut AcknowledgementOutcome,
    ) {
        outcome.states.push(AcknowledgementState::AfterSendCheck);
        if let Some(action) = directive.after_send() {
            action.apply(conn).await;
            outcome.action = Some(action);
        }
        outcome.states.push(AcknowledgementState::Done);
    }
}

/// Read the code of a caller-supplied acknowledgement for logging. Nothing
/// found here fails the exchange.
fn classify(ack: &[u8], expected: Option<AcknowledgementCode>) -> Option<AcknowledgementCode> {
    let Some(raw) = find_acknowledgement_code(ack) else {
        warn!("supplied acknowledgement has no MSA segment");
        return None;
    };
    if raw.len() > 2 {
        warn!(
            "MSA-1 is longer than two bytes; ignoring trailing bytes: msa1={}",
            String::from_utf8_lossy(raw)
        );
    }
    let code = AcknowledgementCode::from_bytes(raw);
    match (code, expected) {
        (None, _) => warn!(
            "unsupported acknowledgement type: msa1={}",
            String::from_utf8_lossy(raw)
        ),
        (Some(found), Some(expected)) if found != expected => warn!(
            "acknowledgement type mismatch: expected={expected}, found={found}"
        ),
        _ => {}
    }
    code
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, duplex};

    use super::*;
    use crate::{connection::ConnectionState, protocol::envelope};

    const MESSAGE: &[u8] = b"MSH|^~\\&|APP|FAC|RAPP|RFAC|20240101||ADT^A01|42|P|2.5\rPID|1\r";

    async fn read_ack(remote: &mut tokio::io::DuplexStream) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        let n = remote.read(&mut buf).await.expect("read");
        buf.truncate(n);
        buf
    }

    #[rstest]
    #[case::reset_only(true, false, false, false, ConnectionDirective::ResetBeforeSend)]
    #[case::reset_beats_close(true, true, false, false, ConnectionDirective::ResetBeforeSend)]
    #[case::before_beats_after(false, true, true, false, ConnectionDirective::CloseBeforeSend)]
    #[case::after_reset(false, false, true, true, ConnectionDirective::ResetAfterSend)]
    #[case::after_close(false, false, false, true, ConnectionDirective::CloseAfterSend)]
    #[case::none(false, false, false, false, ConnectionDirective::Keep)]
    fn directive_precedence(
        #[case] rb: bool,
        #[case] cb: bool,
        #[case] ra: bool,
        #[case] ca: bool,
        #[case] expected: ConnectionDirective,
    ) {
        assert_eq!(ConnectionDirective::from_flags(rb, cb, ra, ca), expected);
    }

    #[rstest]
    #[case::success(None, "MSA|AA|42\r")]
    #[case::failure(Some("handler failed"), "MSA|AE|42|handler failed\r")]
    #[tokio::test]
    async fn synthesised_code_follows_processing_outcome(
        #[case] error: Option<&str>,
        #[case] msa: &str,
    ) {
        let (local, mut remote) = duplex(1024);
        let mut conn = MllpConnection::new(local);
        let work = UnitOfWork::new(Bytes::from_static(MESSAGE)).processing_error(error);
        let outcome = AcknowledgementOrchestrator::default()
            .acknowledge(&mut conn, work)
            .await
            .expect("acknowledge");
        assert!(outcome.delivered());
        assert_eq!(outcome.state(), AcknowledgementState::Done);

        let wire = read_ack(&mut remote).await;
        let expected_tail = format!("\r{msa}\x1c\x1d");
        assert!(wire.ends_with(expected_tail.as_bytes()));
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn reject_hint_is_honoured() {
        let (local, _remote) = duplex(1024);
        let mut conn = MllpConnection::new(local);
        let work = UnitOfWork::new(Bytes::from_static(MESSAGE))
            .processing_error(Some("rejected"))
            .expected_code(Some(AcknowledgementCode::AR));
        let outcome = AcknowledgementOrchestrator::default()
            .acknowledge(&mut conn, work)
            .await
            .expect("acknowledge");
        assert_eq!(outcome.code, Some(AcknowledgementCode::AR));
    }

    #[tokio::test]
    async fn supplied_acknowledgement_is_sent_verbatim() {
        let (local, mut remote) = duplex(1024);
        let mut conn = MllpConnection::new(local);
        let ack = Bytes::from_static(b"MSH|^~\\&|X\rMSA|CA|42\r");
        let work = UnitOfWork::new(Bytes::from_static(MESSAGE))
            .acknowledgement(Some(ack.clone()))
            .expected_code(Some(AcknowledgementCode::AA));
        let outcome = AcknowledgementOrchestrator::default()
            .acknowledge(&mut conn, work)
            .await
            .expect("acknowledge");
        assert_eq!(outcome.code, Some(AcknowledgementCode::CA));
        assert_eq!(read_ack(&mut remote).await, envelope(&ack));
    }

    #[tokio::test]
    async fn before_send_directive_skips_acknowledgement() {
        let (local, mut remote) = duplex(1024);
        let mut conn = MllpConnection::new(local);
        let work = UnitOfWork::new(Bytes::from_static(MESSAGE))
            .directive(ConnectionDirective::ResetBeforeSend);
        let outcome = AcknowledgementOrchestrator::default()
            .acknowledge(&mut conn, work)
            .await
            .expect("acknowledge");
        assert_eq!(
            outcome.states,
            vec![AcknowledgementState::BeforeSendCheck, AcknowledgementState::Done]
        );
        assert_eq!(outcome.action, Some(TeardownAction::Reset));
        assert!(outcome.acknowledgement.is_none());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(read_ack(&mut remote).await.is_empty());
    }

    #[tokio::test]
    async fn after_send_directive_runs_after_delivery() {
        let (local, mut remote) = duplex(1024);
        let mut conn = MllpConnection::new(local);
        let work = UnitOfWork::new(Bytes::from_static(MESSAGE))
            .directive(ConnectionDirective::CloseAfterSend);
        let outcome = AcknowledgementOrchestrator::default()
            .acknowledge(&mut conn, work)
            .await
            .expect("acknowledge");
        assert_eq!(
            outcome.states,
            vec![
                AcknowledgementState::BeforeSendCheck,
                AcknowledgementState::AckResolution,
                AcknowledgementState::Send,
                AcknowledgementState::AfterSendCheck,
                AcknowledgementState::Done,
            ]
        );
        assert_eq!(outcome.action, Some(TeardownAction::Close));
        assert!(!read_ack(&mut remote).await.is_empty());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn disabled_auto_ack_without_acknowledgement_fails() {
        let (local, _remote) = duplex(1024);
        let mut conn = MllpConnection::new(local);
        let work = UnitOfWork::new(Bytes::from_static(MESSAGE))
            .auto_ack(false)
            .directive(ConnectionDirective::ResetAfterSend);
        let err = AcknowledgementOrchestrator::default()
            .acknowledge(&mut conn, work)
            .await
            .expect_err("no acknowledgement");
        assert!(matches!(err, MllpError::InvalidAcknowledgement { .. }));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn delivery_failure_is_recorded_not_raised() {
        let (local, remote) = duplex(1024);
        drop(remote);
        let mut conn = MllpConnection::new(local);
        let work = UnitOfWork::new(Bytes::from_static(MESSAGE))
            .directive(ConnectionDirective::ResetAfterSend);
        let outcome = AcknowledgementOrchestrator::default()
            .acknowledge(&mut conn, work)
            .await
            .expect("acknowledge");
        assert!(!outcome.delivered());
        assert!(matches!(
            outcome.delivery_failure,
            Some(MllpError::Write {
                role: Role::Acknowledgement,
                ..
            })
        ));
        assert_eq!(outcome.action, Some(TeardownAction::Reset));
    }

    #[tokio::test]
    async fn unacknowledgeable_message_is_an_error() {
        let (local, _remote) = duplex(1024);
        let mut conn = MllpConnection::new(local);
        let work = UnitOfWork::new(Bytes::from_static(b"PID|1\r"));
        let err = AcknowledgementOrchestrator::default()
            .acknowledge(&mut conn, work)
            .await
            .expect_err("generation");
        assert!(matches!(err, MllpError::AcknowledgementGeneration(_)));
    }
}
