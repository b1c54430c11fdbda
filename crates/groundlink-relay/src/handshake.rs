//! Radio initialization handshake.
//!
//! Before any payload is relayed the remote radio peer and the ground
//! station exchange three single-byte sentinels:
//!
//! ```text
//!   peer                          ground station
//!    |  INITIALIZATION_REQUEST 0xFC   |
//!    | -----------------------------> |
//!    |  INITIALIZATION_REQUEST_ACK    |
//!    | <----------------------------- |  0xFD
//!    |  ACK 0xFF                      |
//!    | -----------------------------> |
//! ```
//!
//! Only the first byte of each inbound message is inspected. The exchange
//! can be skipped by configuration, in which case the link is still opened.

use std::time::Duration;

use groundlink_core::Error;
use groundlink_core::protocol::{ACK, INITIALIZATION_REQUEST, INITIALIZATION_REQUEST_ACK};
use groundlink_core::radio::{PeerAddress, RadioLink};

use crate::error::{HandshakeError, HandshakeStage};

/// Progress of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    AwaitingInitRequest,
    AwaitingAck,
    Ready,
    Failed,
}

impl HandshakeState {
    fn name(self) -> &'static str {
        match self {
            HandshakeState::NotStarted => "NotStarted",
            HandshakeState::AwaitingInitRequest => "AwaitingInitRequest",
            HandshakeState::AwaitingAck => "AwaitingAck",
            HandshakeState::Ready => "Ready",
            HandshakeState::Failed => "Failed",
        }
    }
}

/// Drives the handshake over a [`RadioLink`].
#[derive(Debug)]
pub struct HandshakeCoordinator {
    peer: PeerAddress,
    timeout: Option<Duration>,
    state: HandshakeState,
}

impl HandshakeCoordinator {
    /// `timeout` bounds each wait for a peer message; `None` waits forever.
    pub fn new(peer: PeerAddress, timeout: Option<Duration>) -> Self {
        Self {
            peer,
            timeout,
            state: HandshakeState::NotStarted,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    /// Open the radio link: `NotStarted -> AwaitingInitRequest`.
    pub async fn open_link(&mut self, link: &mut dyn RadioLink) -> Result<(), HandshakeError> {
        self.require(HandshakeState::NotStarted)?;

        if let Err(source) = link.open().await {
            tracing::error!(peer = %self.peer, error = %source, "Failed to open radio link");
            self.state = HandshakeState::Failed;
            return Err(HandshakeError::Radio {
                stage: HandshakeStage::Open,
                source,
            });
        }

        tracing::debug!(peer = %self.peer, "Radio link open, awaiting initialization request");
        self.state = HandshakeState::AwaitingInitRequest;
        Ok(())
    }

    /// Run the sentinel exchange: `AwaitingInitRequest -> Ready`.
    ///
    /// Any failure leaves the coordinator in `Failed`.
    pub async fn perform(&mut self, link: &mut dyn RadioLink) -> Result<(), HandshakeError> {
        self.require(HandshakeState::AwaitingInitRequest)?;

        match self.exchange(link).await {
            Ok(()) => {
                tracing::info!(peer = %self.peer, "Radio handshake complete");
                Ok(())
            }
            Err(e) => {
                tracing::error!(peer = %self.peer, error = %e, "Radio handshake failed");
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    /// Bypass the exchange: `AwaitingInitRequest -> Ready`.
    pub fn skip(&mut self) -> Result<(), HandshakeError> {
        self.require(HandshakeState::AwaitingInitRequest)?;
        tracing::info!(peer = %self.peer, "Radio handshake skipped");
        self.state = HandshakeState::Ready;
        Ok(())
    }

    fn require(&self, expected: HandshakeState) -> Result<(), HandshakeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HandshakeError::InvalidState(self.state.name()))
        }
    }

    async fn exchange(&mut self, link: &mut dyn RadioLink) -> Result<(), HandshakeError> {
        self.expect(link, HandshakeStage::InitRequest, INITIALIZATION_REQUEST)
            .await?;

        link.send(self.peer, &[INITIALIZATION_REQUEST_ACK])
            .await
            .map_err(|source| HandshakeError::Radio {
                stage: HandshakeStage::InitRequestAck,
                source,
            })?;
        self.state = HandshakeState::AwaitingAck;

        self.expect(link, HandshakeStage::Ack, ACK).await?;
        self.state = HandshakeState::Ready;
        Ok(())
    }

    /// Receive one message and check its first byte.
    async fn expect(
        &self,
        link: &mut dyn RadioLink,
        stage: HandshakeStage,
        expected: u8,
    ) -> Result<(), HandshakeError> {
        let message = link.receive(self.timeout).await.map_err(|e| match e {
            Error::Timeout => HandshakeError::Timeout { stage },
            source => HandshakeError::Radio { stage, source },
        })?;

        // Messages are not filtered by source; the radio network has one peer.
        tracing::debug!(
            stage = %stage,
            source = %message.source,
            len = message.data.len(),
            "Handshake message"
        );

        match message.first_byte() {
            Some(got) if got == expected => Ok(()),
            Some(got) => Err(HandshakeError::UnexpectedSentinel {
                stage,
                expected,
                got,
            }),
            None => Err(HandshakeError::EmptyMessage { stage }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundlink_test_harness::{MOCK_REMOTE_ADDRESS, MockRadioLink};

    const WAIT: Duration = Duration::from_millis(200);

    async fn opened(link: &mut MockRadioLink) -> HandshakeCoordinator {
        let mut coordinator = HandshakeCoordinator::new(MOCK_REMOTE_ADDRESS, Some(WAIT));
        coordinator.open_link(link).await.unwrap();
        assert_eq!(coordinator.state(), HandshakeState::AwaitingInitRequest);
        coordinator
    }

    #[tokio::test]
    async fn request_then_ack_reaches_ready() {
        let (mut link, handle) = MockRadioLink::new();
        handle.push_message(&[INITIALIZATION_REQUEST]);
        handle.push_message(&[ACK]);

        let mut coordinator = opened(&mut link).await;
        coordinator.perform(&mut link).await.unwrap();

        assert_eq!(coordinator.state(), HandshakeState::Ready);
        let sent = handle.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].peer, MOCK_REMOTE_ADDRESS);
        assert_eq!(sent[0].data, vec![INITIALIZATION_REQUEST_ACK]);
    }

    #[tokio::test]
    async fn wrong_first_sentinel_fails_without_reply() {
        let (mut link, handle) = MockRadioLink::new();
        handle.push_message(&[0x00]);

        let mut coordinator = opened(&mut link).await;
        let result = coordinator.perform(&mut link).await;

        assert!(matches!(
            result,
            Err(HandshakeError::UnexpectedSentinel {
                stage: HandshakeStage::InitRequest,
                expected: INITIALIZATION_REQUEST,
                got: 0x00,
            })
        ));
        assert_eq!(coordinator.state(), HandshakeState::Failed);
        assert!(handle.sent().is_empty());
    }

    #[tokio::test]
    async fn wrong_ack_fails_after_reply() {
        let (mut link, handle) = MockRadioLink::new();
        handle.push_message(&[INITIALIZATION_REQUEST]);
        handle.push_message(&[0xFE]);

        let mut coordinator = opened(&mut link).await;
        let result = coordinator.perform(&mut link).await;

        assert!(matches!(
            result,
            Err(HandshakeError::UnexpectedSentinel {
                stage: HandshakeStage::Ack,
                got: 0xFE,
                ..
            })
        ));
        assert_eq!(coordinator.state(), HandshakeState::Failed);
        assert_eq!(handle.sent().len(), 1);
    }

    #[tokio::test]
    async fn only_first_byte_is_checked() {
        let (mut link, handle) = MockRadioLink::new();
        handle.push_message(&[INITIALIZATION_REQUEST, 0x01, 0x02]);
        handle.push_message(&[ACK, 0x00]);

        let mut coordinator = opened(&mut link).await;
        coordinator.perform(&mut link).await.unwrap();
        assert_eq!(coordinator.state(), HandshakeState::Ready);
    }

    #[tokio::test]
    async fn empty_message_fails() {
        let (mut link, handle) = MockRadioLink::new();
        handle.push_message(&[]);

        let mut coordinator = opened(&mut link).await;
        let result = coordinator.perform(&mut link).await;
        assert!(matches!(
            result,
            Err(HandshakeError::EmptyMessage {
                stage: HandshakeStage::InitRequest
            })
        ));
    }

    #[tokio::test]
    async fn silence_times_out() {
        let (mut link, _handle) = MockRadioLink::new();
        let mut coordinator = HandshakeCoordinator::new(
            MOCK_REMOTE_ADDRESS,
            Some(Duration::from_millis(20)),
        );
        coordinator.open_link(&mut link).await.unwrap();

        let result = coordinator.perform(&mut link).await;
        assert!(matches!(
            result,
            Err(HandshakeError::Timeout {
                stage: HandshakeStage::InitRequest
            })
        ));
        assert_eq!(coordinator.state(), HandshakeState::Failed);
    }

    #[tokio::test]
    async fn lost_link_while_waiting_is_radio_error() {
        let (mut link, handle) = MockRadioLink::new();
        let mut coordinator = opened(&mut link).await;
        // Nothing can arrive once the peer side is gone.
        drop(handle);

        let result = coordinator.perform(&mut link).await;
        assert!(matches!(
            result,
            Err(HandshakeError::Radio {
                stage: HandshakeStage::InitRequest,
                source: Error::ConnectionLost,
            })
        ));
        assert_eq!(coordinator.state(), HandshakeState::Failed);
    }

    #[tokio::test]
    async fn reply_send_failure_is_radio_error() {
        let (mut link, handle) = MockRadioLink::new();
        handle.push_message(&[INITIALIZATION_REQUEST]);
        handle.fail_next_send(Error::Protocol("network ACK failure".into()));

        let mut coordinator = opened(&mut link).await;
        let result = coordinator.perform(&mut link).await;
        assert!(matches!(
            result,
            Err(HandshakeError::Radio {
                stage: HandshakeStage::InitRequestAck,
                ..
            })
        ));
        assert_eq!(coordinator.state(), HandshakeState::Failed);
    }

    #[tokio::test]
    async fn open_failure_is_fatal() {
        let (mut link, handle) = MockRadioLink::new();
        handle.fail_open(Error::Transport("no such device".into()));

        let mut coordinator = HandshakeCoordinator::new(MOCK_REMOTE_ADDRESS, None);
        let result = coordinator.open_link(&mut link).await;

        assert!(matches!(
            result,
            Err(HandshakeError::Radio {
                stage: HandshakeStage::Open,
                ..
            })
        ));
        assert_eq!(coordinator.state(), HandshakeState::Failed);
    }

    #[tokio::test]
    async fn skip_reaches_ready_without_traffic() {
        let (mut link, handle) = MockRadioLink::new();
        let mut coordinator = opened(&mut link).await;
        coordinator.skip().unwrap();

        assert_eq!(coordinator.state(), HandshakeState::Ready);
        assert!(handle.sent().is_empty());
        assert!(handle.is_open());
    }

    #[tokio::test]
    async fn out_of_order_calls_are_rejected() {
        let (mut link, _handle) = MockRadioLink::new();
        let mut coordinator = HandshakeCoordinator::new(MOCK_REMOTE_ADDRESS, Some(WAIT));

        assert!(matches!(
            coordinator.perform(&mut link).await,
            Err(HandshakeError::InvalidState("NotStarted"))
        ));
        assert!(coordinator.skip().is_err());

        coordinator.open_link(&mut link).await.unwrap();
        assert!(coordinator.open_link(&mut link).await.is_err());
    }
}
