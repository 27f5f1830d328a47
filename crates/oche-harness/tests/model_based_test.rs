//! Model-based property tests.
//!
//! proptest generates operation sequences against a small room. Each
//! operation is applied to a trivial reference model and to a [`SimWorld`] of
//! real clients; after every step the two must agree on which commands were
//! accepted, who is in the room and how many chat messages each client
//! holds. Device bookkeeping is checked on the side: every live capture must
//! belong to one of its client's controllers.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!             ┌────────────┴────────────┐
//!             ▼                         ▼
//!        ModelWorld                 SimWorld
//!        (reference)           (paused clock)
//!             └──────── compare ────────┘
//! ```

use std::{collections::BTreeSet, time::Duration};

use oche_client::{AppEvent, ClientConfig};
use oche_core::{CaptureId, MessageKind, Role};
use oche_harness::{IDENTITY_PREFIX, SimWorld};
use proptest::{prelude::*, test_runner::TestCaseError};

const CLIENTS: usize = 3;

const LINES: [&str; 5] = ["game on", "nice 180", "bust", "treble twenty", "shot"];

#[derive(Debug, Clone)]
enum Operation {
    Join { client: usize },
    Leave { client: usize },
    Send { client: usize, line: usize },
    GoLive { client: usize },
    EndStream { client: usize },
    StartShare { client: usize },
    StopShare { client: usize },
    NativeStop { client: usize },
    Advance { millis: u64 },
}

fn role(client: usize) -> Role {
    if client % 2 == 0 { Role::Streamer } else { Role::Viewer }
}

fn name(client: usize) -> String {
    format!("p{client}")
}

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => (0..CLIENTS).prop_map(|client| Operation::Join { client }),
        1 => (0..CLIENTS).prop_map(|client| Operation::Leave { client }),
        4 => (0..CLIENTS, 0..LINES.len()).prop_map(|(client, line)| Operation::Send { client, line }),
        2 => (0..CLIENTS).prop_map(|client| Operation::GoLive { client }),
        1 => (0..CLIENTS).prop_map(|client| Operation::EndStream { client }),
        2 => (0..CLIENTS).prop_map(|client| Operation::StartShare { client }),
        1 => (0..CLIENTS).prop_map(|client| Operation::StopShare { client }),
        1 => (0..CLIENTS).prop_map(|client| Operation::NativeStop { client }),
        1 => (0u64..12_000).prop_map(|millis| Operation::Advance { millis }),
    ]
}

/// Reference model: membership and message counts only.
#[derive(Debug, Default)]
struct ModelWorld {
    joined: [bool; CLIENTS],
    messages: [usize; CLIENTS],
}

impl ModelWorld {
    /// Apply `op`, returning whether the real client should accept it.
    fn apply(&mut self, op: &Operation) -> bool {
        match *op {
            Operation::Join { client } => {
                if self.joined[client] {
                    return false;
                }
                self.joined[client] = true;
                true
            },
            Operation::Leave { client } => {
                self.joined[client] = false;
                self.messages[client] = 0;
                true
            },
            Operation::Send { client, .. } => {
                if !self.joined[client] {
                    return false;
                }
                // the sender's echo counts like everyone else's copy
                for (joined, count) in self.joined.iter().zip(&mut self.messages) {
                    if *joined {
                        *count += 1;
                    }
                }
                true
            },
            Operation::GoLive { client } | Operation::StartShare { client } => {
                self.joined[client] && role(client).can_publish()
            },
            Operation::EndStream { .. }
            | Operation::StopShare { .. }
            | Operation::NativeStop { .. }
            | Operation::Advance { .. } => true,
        }
    }
}

async fn apply(world: &mut SimWorld, op: &Operation) -> bool {
    let (client, event) = match *op {
        Operation::Join { client } => (client, AppEvent::Join { name: name(client), role: role(client) }),
        Operation::Leave { client } => (client, AppEvent::Leave),
        Operation::Send { client, line } => {
            (client, AppEvent::SendMessage { content: LINES[line].to_string() })
        },
        Operation::GoLive { client } => (client, AppEvent::GoLive),
        Operation::EndStream { client } => (client, AppEvent::EndStream),
        Operation::StartShare { client } => (client, AppEvent::StartScreenShare),
        Operation::StopShare { client } => (client, AppEvent::StopScreenShare),
        Operation::NativeStop { client } => {
            if let Some(platform) = world.client(client).map(|c| c.platform().clone())
                && let Some(capture) = platform.active_display_capture()
            {
                platform.end_capture_natively(capture);
            }
            world.settle().await;
            return true;
        },
        Operation::Advance { millis } => {
            world.run_for(Duration::from_millis(millis)).await;
            return true;
        },
    };
    world.send(client, event).await.is_ok()
}

fn check(world: &SimWorld, model: &ModelWorld) -> Result<(), TestCaseError> {
    let joined = model.joined.iter().filter(|j| **j).count();
    prop_assert_eq!(world.room().participant_count(), joined);

    for (id, client) in world.clients().iter().enumerate() {
        let app = client.app();
        prop_assert_eq!(app.session().is_connected(), model.joined[id]);

        let messages = app.chat().messages().filter(|m| m.kind == MessageKind::Message).count();
        prop_assert_eq!(messages, model.messages[id], "client {}", id);

        let ids: Vec<_> = app.chat().messages().map(|m| m.id).collect();
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let owned: BTreeSet<CaptureId> =
            [app.camera().capture(), app.microphone().capture(), app.screen().capture()]
                .into_iter()
                .flatten()
                .collect();
        let live: BTreeSet<CaptureId> = client.platform().live_captures().into_keys().collect();
        prop_assert_eq!(&live, &owned, "client {}", id);

        if !model.joined[id] {
            prop_assert!(live.is_empty());
            let identity = format!("{IDENTITY_PREFIX}{}", name(id));
            prop_assert!(world.room().publications(&identity).is_empty());
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn real_clients_match_model(ops in prop::collection::vec(operation(), 1..40), seed in any::<u64>()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut world = SimWorld::new(seed);
            for _ in 0..CLIENTS {
                world.add_client(&ClientConfig::default());
            }
            let mut model = ModelWorld::default();

            for op in &ops {
                let expected = model.apply(op);
                let accepted = apply(&mut world, op).await;
                prop_assert_eq!(accepted, expected, "{:?}", op);
                check(&world, &model)?;
            }
            Ok(())
        })?;
    }
}
