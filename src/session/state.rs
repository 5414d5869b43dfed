//! Session state machine
//!
//! Tracks the lifecycle of one connection from accept to close. Phases only
//! move forward; any failure jumps straight to [`SessionPhase::Closed`].

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP connected, handshake not started
    Uninitialized,
    /// Handshake in progress
    Handshaking,
    /// `connect` accepted and negotiated
    Connected,
    /// Client intent and stream name known
    StreamIdentified,
    /// Publisher is pushing media
    Publishing,
    /// Player is pulling media
    Playing,
    /// Terminal
    Closed,
}

impl SessionPhase {
    /// Whether `next` is a legal successor of this phase
    pub fn can_advance_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Uninitialized, Handshaking)
                | (Handshaking, Connected)
                | (Connected, StreamIdentified)
                | (StreamIdentified, Publishing)
                | (StreamIdentified, Playing)
        ) || (next == Closed && self != Closed)
    }
}

/// Per-connection state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Connection start time
    pub connected_at: Instant,

    /// Time when handshake completed
    pub handshake_completed_at: Option<Instant>,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Uninitialized,
            connected_at: Instant::now(),
            handshake_completed_at: None,
        }
    }

    /// Move to `next`; illegal transitions are ignored and return false
    pub fn advance(&mut self, next: SessionPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            tracing::warn!(
                session_id = self.id,
                from = ?self.phase,
                to = ?next,
                "Ignoring illegal phase transition"
            );
            return false;
        }
        if self.phase == SessionPhase::Handshaking {
            self.handshake_completed_at = Some(Instant::now());
        }
        self.phase = next;
        true
    }

    /// Enter the terminal phase
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
