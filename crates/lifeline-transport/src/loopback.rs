//! In-process loopback transport.
//!
//! A [`LoopbackDialer`] hands the server half of every successful dial to a
//! [`LoopbackListener`], so a test (or an embedded server) can play the
//! remote side frame by frame. The dialer can be told to refuse dials, which
//! is how reconnect and backoff behaviour is exercised without a network.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::{Connection, ConnectionId, Dialer, TransportError};

/// Creates a dialer and the listener that receives its server halves.
pub fn loopback() -> (LoopbackDialer, LoopbackListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let dialer = LoopbackDialer {
        shared: Arc::new(StdMutex::new(DialerState {
            accept_tx,
            fail_next: 0,
            refuse_all: false,
            refused_endpoints: HashSet::new(),
            dials: Vec::new(),
        })),
    };
    (dialer, LoopbackListener { rx: accept_rx })
}

/// Creates a directly connected pair of loopback connections.
pub fn pair() -> (LoopbackConnection, LoopbackConnection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        LoopbackConnection::new(b_tx, a_rx),
        LoopbackConnection::new(a_tx, b_rx),
    )
}

/// One recorded dial attempt.
#[derive(Debug, Clone)]
pub struct DialRecord {
    /// The endpoint the dial targeted.
    pub endpoint: String,
    /// When the dial started (Tokio clock, so it follows paused time).
    pub at: Instant,
    /// Whether the dial produced a connection.
    pub accepted: bool,
}

struct DialerState {
    accept_tx: mpsc::UnboundedSender<LoopbackConnection>,
    fail_next: u32,
    refuse_all: bool,
    refused_endpoints: HashSet<String>,
    dials: Vec<DialRecord>,
}

/// A [`Dialer`] whose connections terminate in a [`LoopbackListener`].
///
/// Cloning shares the same failure switches and dial log.
#[derive(Clone)]
pub struct LoopbackDialer {
    shared: Arc<StdMutex<DialerState>>,
}

impl LoopbackDialer {
    fn state(&self) -> MutexGuard<'_, DialerState> {
        // A poisoned lock only means a test thread panicked mid-update;
        // the state itself is still usable.
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes the next `n` dials fail with a refused connection.
    pub fn fail_next(&self, n: u32) {
        self.state().fail_next = n;
    }

    /// Refuses every dial until switched off again.
    pub fn refuse_all(&self, refuse: bool) {
        self.state().refuse_all = refuse;
    }

    /// Refuses every dial to one specific endpoint.
    pub fn refuse_endpoint(&self, endpoint: &str) {
        self.state().refused_endpoints.insert(endpoint.to_string());
    }

    /// Returns every dial attempt made so far, oldest first.
    pub fn dials(&self) -> Vec<DialRecord> {
        self.state().dials.clone()
    }

    /// Number of dial attempts made so far.
    pub fn dial_count(&self) -> usize {
        self.state().dials.len()
    }
}

impl Dialer for LoopbackDialer {
    type Connection = LoopbackConnection;

    async fn dial(
        &self,
        endpoint: &str,
    ) -> Result<Self::Connection, TransportError> {
        let mut state = self.state();

        let refused = if state.fail_next > 0 {
            state.fail_next -= 1;
            true
        } else {
            state.refuse_all || state.refused_endpoints.contains(endpoint)
        };

        let outcome = if refused {
            Err(TransportError::refused(format!("{endpoint} refused")))
        } else {
            let (client, server) = pair();
            state
                .accept_tx
                .send(server)
                .map(|()| client)
                .map_err(|_| TransportError::refused("listener dropped"))
        };

        state.dials.push(DialRecord {
            endpoint: endpoint.to_string(),
            at: Instant::now(),
            accepted: outcome.is_ok(),
        });
        tracing::trace!(endpoint, accepted = outcome.is_ok(), "loopback dial");
        outcome
    }
}

/// Receives the server half of every accepted loopback dial.
pub struct LoopbackListener {
    rx: mpsc::UnboundedReceiver<LoopbackConnection>,
}

impl LoopbackListener {
    /// Waits for the next dialed connection.
    ///
    /// Returns `None` once every dialer clone has been dropped.
    pub async fn accept(&mut self) -> Option<LoopbackConnection> {
        self.rx.recv().await
    }
}

enum Frame {
    Data(Vec<u8>),
    Fault(String),
}

/// One half of a loopback connection.
pub struct LoopbackConnection {
    id: ConnectionId,
    tx: StdMutex<Option<mpsc::UnboundedSender<Frame>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl LoopbackConnection {
    fn new(
        tx: mpsc::UnboundedSender<Frame>,
        rx: mpsc::UnboundedReceiver<Frame>,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Frame>> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Breaks the connection abnormally: the peer's next `recv` after any
    /// buffered frames returns a receive error instead of a clean close.
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take()
        {
            let _ = tx.send(Frame::Fault(reason.to_string()));
        }
    }

    /// Sends a UTF-8 frame; convenience for tests playing the server.
    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send(text.as_bytes()).await
    }

    /// Receives the next frame as UTF-8 text.
    pub async fn recv_text(&self) -> Result<Option<String>, TransportError> {
        Ok(self
            .recv()
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

impl Connection for LoopbackConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let tx = self.sender().ok_or_else(|| {
            TransportError::ConnectionClosed("closed locally".into())
        })?;
        tx.send(Frame::Data(data.to_vec())).map_err(|_| {
            TransportError::ConnectionClosed("peer dropped".into())
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.rx.lock().await.recv().await {
            Some(Frame::Data(data)) => Ok(Some(data)),
            Some(Frame::Fault(reason)) => {
                Err(TransportError::ReceiveFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    reason,
                )))
            }
            None => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping our sender ends the peer's receive stream.
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
