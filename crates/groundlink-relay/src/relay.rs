//! The relay: control channel bytes in, fixed-size radio frames out.
//!
//! Startup opens the radio link and runs the handshake, then the control
//! channel starts listening. Each accepted client is sent READY and then
//! served by a session:
//!
//! ```text
//!  control client --bytes--> reader --Frame--> [mpsc, frame_queue_depth] --> radio task --> RadioLink::send(peer)
//! ```
//!
//! The reader runs inline in [`Relay::serve`]; the radio task is spawned per
//! session, owns the link while it runs, and hands it back when the session
//! ends. Frames keep their order and each is sent at most once.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use groundlink_core::Error;
use groundlink_core::events::RelayEvent;
use groundlink_core::protocol::READY;
use groundlink_core::radio::{PeerAddress, RadioLink};
use groundlink_transport::{ControlChannelServer, ControlConnection};

use crate::config::{DisconnectPolicy, RelayConfig};
use crate::error::{HandshakeError, HandshakeStage, RelayError, RelayResult};
use crate::frame::{Frame, FrameAccumulator, FrameStatus};
use crate::handshake::{HandshakeCoordinator, HandshakeState};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Pause after a failed accept so a persistent failure does not spin.
const ACCEPT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

/// How a session ended.
enum SessionEnd {
    /// The client went away or its socket failed.
    Disconnected(Error),
    /// Shutdown was requested.
    Cancelled,
}

/// What the radio task hands back.
struct RadioTaskOutcome {
    link: Box<dyn RadioLink>,
    next_seq: u64,
    fatal: Option<RelayError>,
}

/// Owns every piece of relay state: config, peer, radio link and handshake.
pub struct Relay {
    config: RelayConfig,
    peer: PeerAddress,
    /// `None` only while a session's radio task holds it.
    link: Option<Box<dyn RadioLink>>,
    handshake: HandshakeCoordinator,
    event_tx: broadcast::Sender<RelayEvent>,
    next_seq: u64,
}

impl Relay {
    /// Validate `config` and take ownership of `link` (not yet opened).
    pub fn new(config: RelayConfig, link: Box<dyn RadioLink>) -> RelayResult<Self> {
        config.validate()?;
        let peer = config.peer()?;
        let handshake = HandshakeCoordinator::new(peer, config.handshake_timeout());
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            peer,
            link: Some(link),
            handshake,
            event_tx,
            next_seq: 0,
        })
    }

    /// Subscribe to relay events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Open the radio link and run (or skip) the handshake.
    ///
    /// A link that fails to open is a [`RelayError::Setup`]; a failed
    /// handshake is a [`RelayError::Handshake`] and closes the link again.
    pub async fn start(&mut self) -> RelayResult<()> {
        let link = self.link.as_mut().ok_or_else(|| {
            RelayError::Setup(Error::InvalidState("radio link is in use".into()))
        })?;

        tracing::info!(
            peer = %self.peer,
            skip_handshake = self.config.skip_handshake,
            "Opening radio link"
        );
        self.handshake
            .open_link(link.as_mut())
            .await
            .map_err(|e| match e {
                HandshakeError::Radio {
                    stage: HandshakeStage::Open,
                    source,
                } => RelayError::Setup(source),
                other => RelayError::Handshake(other),
            })?;

        let result = if self.config.skip_handshake {
            self.handshake.skip()
        } else {
            self.handshake.perform(link.as_mut()).await
        };
        if let Err(e) = result {
            if let Err(close_err) = link.close().await {
                tracing::warn!(error = %close_err, "Failed to close radio link");
            }
            return Err(e.into());
        }

        let _ = self.event_tx.send(RelayEvent::RadioReady {
            handshake: !self.config.skip_handshake,
        });
        Ok(())
    }

    /// Start, listen on the configured address, and serve until `cancel`
    /// fires or a fatal error occurs. The radio link is closed on return.
    pub async fn run(mut self, cancel: CancellationToken) -> RelayResult<()> {
        let started = tokio::select! {
            result = self.start() => Some(result),
            _ = cancel.cancelled() => None,
        };
        match started {
            Some(result) => result?,
            None => {
                tracing::info!("Shutdown requested during startup");
                self.close_link().await;
                return Ok(());
            }
        }

        let mut server = ControlChannelServer::new();
        let listen_addr = self.config.listen_addr();
        if let Err(e) = server.listen(&listen_addr).await {
            self.close_link().await;
            return Err(RelayError::Setup(e));
        }

        let result = self.serve(&mut server, cancel).await;
        server.close();
        result
    }

    /// Accept clients on an already-listening `server` and relay their
    /// bytes until `cancel` fires, the disconnect policy says to stop, or a
    /// fatal error occurs. The radio link is closed on return.
    pub async fn serve(
        &mut self,
        server: &mut ControlChannelServer,
        cancel: CancellationToken,
    ) -> RelayResult<()> {
        let result = self.accept_loop(server, &cancel).await;
        self.close_link().await;
        result
    }

    async fn accept_loop(
        &mut self,
        server: &mut ControlChannelServer,
        cancel: &CancellationToken,
    ) -> RelayResult<()> {
        if self.handshake.state() != HandshakeState::Ready {
            return Err(RelayError::Setup(Error::InvalidState(
                "relay must be started before serving".into(),
            )));
        }
        let local_addr = server.local_addr().ok_or_else(|| {
            RelayError::Setup(Error::InvalidState("control server is not listening".into()))
        })?;
        tracing::info!(addr = %local_addr, "Listening for control connections");
        let _ = self.event_tx.send(RelayEvent::Listening { addr: local_addr });

        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Relay shutting down");
                    return Ok(());
                }
                accepted = server.accept_one() => accepted,
            };

            let conn = match accepted {
                Ok(conn) => conn,
                Err(e) if e.is_link_down() => return Err(RelayError::Setup(e)),
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            match self.run_session(conn, cancel).await? {
                SessionEnd::Cancelled => {
                    tracing::info!("Relay shutting down");
                    return Ok(());
                }
                SessionEnd::Disconnected(reason) => {
                    let error = RelayError::ControlIo(reason);
                    match self.config.on_disconnect {
                        DisconnectPolicy::Reaccept => {
                            tracing::info!(reason = %error, "Waiting for a new control client");
                        }
                        DisconnectPolicy::Exit => {
                            tracing::info!(reason = %error, "Control client gone, exiting");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Serve one client. Fatal radio errors come back as `Err`.
    async fn run_session(
        &mut self,
        mut conn: ControlConnection,
        cancel: &CancellationToken,
    ) -> RelayResult<SessionEnd> {
        let addr = conn.peer_addr();
        let mut frames = FrameAccumulator::new(self.config.frame_size).map_err(RelayError::Setup)?;

        if let Err(e) = conn.write_byte(READY).await {
            tracing::warn!(addr = %addr, error = %e, "Failed to send READY");
            close_connection(&mut conn).await;
            let _ = self
                .event_tx
                .send(RelayEvent::ClientDisconnected { addr, discarded: 0 });
            return Ok(SessionEnd::Disconnected(e));
        }
        tracing::info!(addr = %addr, "Control client connected");
        let _ = self.event_tx.send(RelayEvent::ClientConnected { addr });

        let link = self.link.take().ok_or_else(|| {
            RelayError::Setup(Error::InvalidState("radio link is in use".into()))
        })?;
        let (frame_tx, frame_rx) = mpsc::channel::<Frame>(self.config.frame_queue_depth);
        let session = cancel.child_token();
        let radio = spawn_radio_task(
            link,
            self.peer,
            frame_rx,
            self.event_tx.clone(),
            self.next_seq,
            session.clone(),
        );

        let read_error = loop {
            let byte = tokio::select! {
                biased;
                _ = session.cancelled() => break None,
                byte = conn.read_byte() => byte,
            };
            match byte {
                Ok(b) => {
                    if let FrameStatus::Complete(frame) = frames.push(b) {
                        tracing::trace!(addr = %addr, data = ?&frame[..], "Frame complete");
                        // Only fails once the radio task has stopped.
                        if frame_tx.send(frame).await.is_err() {
                            break None;
                        }
                    }
                }
                Err(e) => break Some(e),
            }
        };

        // The radio task drains queued frames once the sender is gone.
        drop(frame_tx);
        let discarded = frames.clear();
        close_connection(&mut conn).await;
        if discarded > 0 {
            tracing::debug!(addr = %addr, discarded, "Discarded partial frame");
        }
        tracing::info!(addr = %addr, "Control client disconnected");
        let _ = self
            .event_tx
            .send(RelayEvent::ClientDisconnected { addr, discarded });

        let outcome = radio.await.map_err(|e| {
            tracing::error!(error = %e, "Radio task failed");
            RelayError::RadioLinkLost(Error::Transport(format!("radio task failed: {e}")))
        })?;
        self.link = Some(outcome.link);
        self.next_seq = outcome.next_seq;

        if let Some(fatal) = outcome.fatal {
            return Err(fatal);
        }
        match read_error {
            Some(e) if !cancel.is_cancelled() => Ok(SessionEnd::Disconnected(e)),
            _ => Ok(SessionEnd::Cancelled),
        }
    }

    async fn close_link(&mut self) {
        if let Some(link) = self.link.as_mut() {
            if link.is_open() {
                match link.close().await {
                    Ok(()) => tracing::info!("Radio link closed"),
                    Err(e) => tracing::warn!(error = %e, "Failed to close radio link"),
                }
            }
        }
    }
}

async fn close_connection(conn: &mut ControlConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(addr = %conn.peer_addr(), error = %e, "Control connection close failed");
    }
}

/// Spawn the task that owns the radio link for one session.
fn spawn_radio_task(
    link: Box<dyn RadioLink>,
    peer: PeerAddress,
    frames: mpsc::Receiver<Frame>,
    event_tx: broadcast::Sender<RelayEvent>,
    first_seq: u64,
    session: CancellationToken,
) -> JoinHandle<RadioTaskOutcome> {
    tokio::spawn(radio_loop(link, peer, frames, event_tx, first_seq, session))
}

/// Send each queued frame to `peer` until the queue closes.
///
/// Transient send failures drop the frame and carry on; a link-down error
/// cancels the session and is handed back as fatal.
async fn radio_loop(
    mut link: Box<dyn RadioLink>,
    peer: PeerAddress,
    mut frames: mpsc::Receiver<Frame>,
    event_tx: broadcast::Sender<RelayEvent>,
    mut seq: u64,
    session: CancellationToken,
) -> RadioTaskOutcome {
    let mut fatal = None;

    loop {
        let frame = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let frame_seq = seq;
        seq += 1;

        match link.send(peer, &frame).await {
            Ok(()) => {
                tracing::debug!(seq = frame_seq, len = frame.len(), peer = %peer, "Frame sent");
                let _ = event_tx.send(RelayEvent::FrameSent {
                    seq: frame_seq,
                    len: frame.len(),
                });
            }
            Err(e) => match RelayError::from_radio_send(e) {
                RelayError::RadioSend(e) => {
                    tracing::warn!(seq = frame_seq, peer = %peer, error = %e, "Dropping frame");
                    let _ = event_tx.send(RelayEvent::FrameDropped {
                        seq: frame_seq,
                        reason: e.to_string(),
                    });
                }
                lost => {
                    tracing::error!(seq = frame_seq, error = %lost, "Radio link lost");
                    let _ = event_tx.send(RelayEvent::FrameDropped {
                        seq: frame_seq,
                        reason: lost.to_string(),
                    });
                    fatal = Some(lost);
                    session.cancel();
                    break;
                }
            },
        }
    }

    let undelivered = frames.len();
    if undelivered > 0 {
        tracing::warn!(undelivered, "Frames left unsent at session end");
    }
    RadioTaskOutcome {
        link,
        next_seq: seq,
        fatal,
    }
}
