//! Fuzz target for the [`SessionMachine`] connection lifecycle
//!
//! The room service, the token endpoint and the network all report back in
//! whatever order they like. The session machine must stay consistent no
//! matter how those reports interleave with user commands and ticks.
//!
//! # Strategy
//!
//! - Event sequences: arbitrary joins, grants, connects, drops, leaves, room
//!   notifications, table refreshes and ticks
//! - Stale results: grants and connects arriving after a leave
//! - Timing: ticks that jump past several deadlines at once
//!
//! # Invariants
//!
//! - `Connected` always has a local identity; `Disconnected` never does
//! - `Disconnected` has no armed deadline
//! - `Connect` is only requested while connecting or reconnecting
//! - After a tick, no deadline is left at or before that tick
//! - The pulse counter never goes backwards
//! - Backoff never exceeds its cap; a retry is never further out than cap
//!   plus jitter
//! - NEVER panic on unexpected ordering

#![no_main]

use std::{
    ops::{Add, Sub},
    time::Duration,
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use oche_core::{
    ConnectionState, DisconnectReason, JoinGrant, ParticipantRecord, RoomEvent, RoomTables,
    SessionAction, SessionConfig, SessionMachine,
};

/// Represents time as Duration since epoch 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FuzzInstant(Duration);

impl Add<Duration> for FuzzInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub for FuzzInstant {
    type Output = Duration;

    fn sub(self, other: Self) -> Duration {
        self.0.saturating_sub(other.0)
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum SessionEvent {
    BeginJoin,
    Grant,
    GrantFailed,
    Connected,
    ConnectFailed { entropy: u64 },
    Disconnected { reason: u8, entropy: u64 },
    Leave,
    PeerJoined { peer: u8 },
    PeerLeft { peer: u8 },
    Tables { peers: u8 },
    Tick { advance_ms: u16 },
}

fn reason(byte: u8) -> DisconnectReason {
    match byte % 4 {
        0 => DisconnectReason::ClientInitiated,
        1 => DisconnectReason::TransportLoss,
        2 => DisconnectReason::ServerShutdown,
        _ => DisconnectReason::Kicked,
    }
}

fn peer(n: u8) -> String {
    format!("ft-peer{}", n % 8)
}

fn record(identity: &str) -> ParticipantRecord {
    ParticipantRecord {
        identity: identity.to_string(),
        sid: format!("PA_{identity}"),
        ..ParticipantRecord::default()
    }
}

fn check_connects(state_before: ConnectionState, actions: &[SessionAction]) {
    if actions.iter().any(|a| matches!(a, SessionAction::Connect { .. })) {
        assert!(
            matches!(
                state_before,
                ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
            ),
            "connect requested from {state_before:?}"
        );
    }
}

fuzz_target!(|events: Vec<SessionEvent>| {
    let config = SessionConfig { backoff_jitter: Duration::from_millis(250), ..SessionConfig::default() };
    let cap = config.backoff_cap;
    let jitter = config.backoff_jitter;
    let mut session: SessionMachine<FuzzInstant> = SessionMachine::new(config);
    let mut now = FuzzInstant(Duration::ZERO);
    let mut pulses = 0;

    for event in events {
        let before = session.state();

        match event {
            SessionEvent::BeginJoin => {
                let result = session.begin_join();
                assert_eq!(result.is_ok(), before == ConnectionState::Disconnected);
            },
            SessionEvent::Grant => {
                let grant = JoinGrant {
                    token: "tok".into(),
                    server_url: "wss://fuzz.invalid".into(),
                    room_id: "oche".into(),
                };
                check_connects(before, &session.on_grant(grant));
            },
            SessionEvent::GrantFailed => {
                if before == ConnectionState::Connecting {
                    session.on_grant_failed("endpoint down");
                    assert_eq!(session.state(), ConnectionState::Disconnected);
                }
            },
            SessionEvent::Connected => {
                session.on_connected("ft-local".into(), now);
            },
            SessionEvent::ConnectFailed { entropy } => {
                let _ = session.on_connect_failed("refused", now, entropy);
            },
            SessionEvent::Disconnected { reason: byte, entropy } => {
                session.on_disconnected(reason(byte), now, entropy);
                if let Some(retry) = session.next_deadline().filter(|_| {
                    matches!(session.state(), ConnectionState::Reconnecting { .. })
                }) {
                    assert!(retry - now <= cap + jitter, "retry {retry:?} too far from {now:?}");
                }
            },
            SessionEvent::Leave => {
                session.leave();
                assert_eq!(session.state(), ConnectionState::Disconnected);
            },
            SessionEvent::PeerJoined { peer: n } => {
                session.on_room_event(&RoomEvent::ParticipantConnected { identity: peer(n) }, now);
            },
            SessionEvent::PeerLeft { peer: n } => {
                session.on_room_event(&RoomEvent::ParticipantDisconnected { identity: peer(n) }, now);
            },
            SessionEvent::Tables { peers } => {
                let tables = RoomTables {
                    local: Some(record("ft-local")),
                    remotes: (0..peers % 8).map(|n| record(&peer(n))).collect(),
                };
                session.on_tables(&tables, now);
            },
            SessionEvent::Tick { advance_ms } => {
                now = now + Duration::from_millis(u64::from(advance_ms));
                let actions = session.tick(now);
                check_connects(before, &actions);
                if let Some(next) = session.next_deadline() {
                    assert!(next > now, "deadline {next:?} left behind at {now:?}");
                }
            },
        }

        match session.state() {
            ConnectionState::Connected => assert!(session.local_identity().is_some()),
            ConnectionState::Disconnected => {
                assert!(session.local_identity().is_none());
                assert!(session.next_deadline().is_none());
            },
            ConnectionState::Reconnecting { attempt } => {
                assert!(session.backoff_delay(attempt) <= cap);
            },
            ConnectionState::Connecting => {},
        }

        assert!(session.pulse_count() >= pulses);
        pulses = session.pulse_count();
    }
});
