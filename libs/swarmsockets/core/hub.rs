//! Hub: process-wide session registry and broadcast coordinator
//!
//! All mutation of the session set happens inside the single `run` loop,
//! which is the set's sole owner for its entire life; register, unregister,
//! broadcast and shutdown requests arrive over channels and are serviced
//! in arrival order. The only state readable from outside the loop is the
//! open/closed flag, behind its own read-write lock.
//!
//! Broadcast fan-out is handed to the bounded worker pool so one slow or
//! full session can never stall the loop.

use crate::core::message::Frame;
use crate::core::session::Session;
use crate::core::worker::TaskPool;
use crate::traits::error::{EngineError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub(crate) struct Hub {
    register_tx: mpsc::Sender<Arc<Session>>,
    unregister_tx: mpsc::Sender<u64>,
    broadcast_tx: mpsc::Sender<Frame>,
    exit_tx: mpsc::Sender<Frame>,
    open: RwLock<bool>,
    count: AtomicUsize,
}

impl Hub {
    /// Create the hub and spawn its dispatch loop. Must be called from
    /// within a tokio runtime.
    pub(crate) fn spawn(workers: usize, queue_depth: usize) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::channel(64);
        let (unregister_tx, unregister_rx) = mpsc::channel(64);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = mpsc::channel(1);

        let hub = Arc::new(Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            exit_tx,
            open: RwLock::new(true),
            count: AtomicUsize::new(0),
        });

        let pool = TaskPool::new(workers, queue_depth);
        tokio::spawn(run(
            Arc::clone(&hub),
            register_rx,
            unregister_rx,
            broadcast_rx,
            exit_rx,
            pool,
        ));
        hub
    }

    /// Whether the hub has shut down. Readable from any task; permanently
    /// true once shutdown completes.
    pub(crate) fn closed(&self) -> bool {
        !*self.open.read()
    }

    /// Number of currently registered sessions
    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub(crate) async fn register(&self, session: Arc<Session>) -> Result<()> {
        self.register_tx
            .send(session)
            .await
            .map_err(|e| EngineError::ChannelSend(e.to_string()))
    }

    pub(crate) async fn unregister(&self, id: u64) -> Result<()> {
        self.unregister_tx
            .send(id)
            .await
            .map_err(|e| EngineError::ChannelSend(e.to_string()))
    }

    pub(crate) async fn broadcast(&self, frame: Frame) -> Result<()> {
        if self.closed() {
            return Err(EngineError::EngineClosed);
        }
        self.broadcast_tx
            .send(frame)
            .await
            .map_err(|_| EngineError::EngineClosed)
    }

    pub(crate) async fn exit(&self, frame: Frame) -> Result<()> {
        if self.closed() {
            return Err(EngineError::EngineAlreadyClosed);
        }
        self.exit_tx
            .send(frame)
            .await
            .map_err(|_| EngineError::EngineAlreadyClosed)
    }
}

/// The single-threaded dispatch loop: sole owner and sole mutator of the
/// session set.
async fn run(
    hub: Arc<Hub>,
    mut register_rx: mpsc::Receiver<Arc<Session>>,
    mut unregister_rx: mpsc::Receiver<u64>,
    mut broadcast_rx: mpsc::Receiver<Frame>,
    mut exit_rx: mpsc::Receiver<Frame>,
    pool: TaskPool,
) {
    let mut sessions: HashMap<u64, Arc<Session>> = HashMap::new();

    loop {
        tokio::select! {
            Some(session) = register_rx.recv() => {
                debug!(session = session.id(), "hub register");
                sessions.insert(session.id(), session);
                hub.count.store(sessions.len(), Ordering::Relaxed);
            }
            Some(id) = unregister_rx.recv() => {
                // Idempotent: removing an absent session is a no-op.
                sessions.remove(&id);
                hub.count.store(sessions.len(), Ordering::Relaxed);
            }
            Some(frame) = broadcast_rx.recv() => {
                for session in sessions.values() {
                    let accepted = match &frame.filter {
                        Some(filter) => filter(session),
                        None => true,
                    };
                    if accepted {
                        let session = Arc::clone(session);
                        let frame = frame.clone();
                        pool.execute(Box::new(move || {
                            // Fire-and-forget; overflow/closed handling is
                            // the session's concern.
                            let _ = session.write_frame(frame);
                        }));
                    }
                }
            }
            Some(frame) = exit_rx.recv() => {
                debug!(sessions = sessions.len(), "hub shutting down");
                {
                    let mut open = hub.open.write();
                    for session in sessions.values() {
                        let _ = session.write_frame(frame.clone());
                        // Closed flag flips now; the write pump still
                        // drains the queued close frame.
                        session.mark_closed();
                    }
                    sessions.clear();
                    hub.count.store(0, Ordering::Relaxed);
                    *open = false;
                }
                break;
            }
            else => break,
        }
    }

    pool.shutdown();
    debug!("hub loop exited");
}
