//! Multi-client simulation driver.
//!
//! A [`SimWorld`] owns one room and any number of full client runtimes wired
//! to it. Delivery inside the room is immediate, so "settling" the world just
//! means pumping every client until nobody has queued events left. Time only
//! moves through [`SimWorld::run_for`], which steps the paused tokio clock
//! from one client deadline to the next.

use std::time::Duration;

use oche_client::{App, AppEvent, ClientConfig, ClientError, Runtime};
use oche_core::earliest;
use tokio::time::Instant;
use tracing::warn;

use crate::{SimEnv, SimPlatform, SimRoom, SimSession, SimTokens};

/// Upper bound on pump rounds before a settle gives up.
const MAX_SETTLE_ROUNDS: usize = 1_000;

/// A client runtime wired to the simulated collaborators.
pub type SimClient = Runtime<SimEnv, SimSession, SimPlatform, SimTokens>;

/// Index of a client in its world.
pub type ClientId = usize;

/// One room, many clients, one clock.
pub struct SimWorld {
    env: SimEnv,
    room: SimRoom,
    clients: Vec<SimClient>,
}

impl SimWorld {
    /// Empty world whose randomness is seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self { env: SimEnv::with_seed(seed), room: SimRoom::new("fuelldart"), clients: Vec::new() }
    }

    /// The shared room.
    pub fn room(&self) -> &SimRoom {
        &self.room
    }

    /// The shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Number of clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the world has no clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Add a client with the default devices.
    pub fn add_client(&mut self, config: &ClientConfig) -> ClientId {
        self.add_client_with(config, SimPlatform::with_default_devices())
    }

    /// Add a client on a specific platform.
    pub fn add_client_with(&mut self, config: &ClientConfig, platform: SimPlatform) -> ClientId {
        let app = App::new(self.env.clone(), config);
        let runtime =
            Runtime::new(app, self.room.session(), platform, SimTokens::new(self.room.clone()));
        self.clients.push(runtime);
        self.clients.len() - 1
    }

    /// Client `id`.
    pub fn client(&self, id: ClientId) -> Option<&SimClient> {
        self.clients.get(id)
    }

    /// Every client.
    pub fn clients(&self) -> &[SimClient] {
        &self.clients
    }

    /// Hand `event` to client `id`, then settle.
    ///
    /// # Errors
    ///
    /// The client's rejection of `event`, or a session error for an unknown
    /// client.
    pub async fn send(&mut self, id: ClientId, event: AppEvent<Instant>) -> Result<(), ClientError> {
        let client =
            self.clients.get_mut(id).ok_or_else(|| ClientError::session(format!("no client {id}")))?;
        let result = client.dispatch(event).await;
        self.settle().await;
        result
    }

    /// Pump every client until no events are queued anywhere.
    pub async fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_ROUNDS {
            let mut handled = 0;
            for client in &mut self.clients {
                handled += client.pump().await;
            }
            if handled == 0 {
                return;
            }
        }
        warn!(rounds = MAX_SETTLE_ROUNDS, "world did not settle");
    }

    /// Advance the clock by `duration`, stopping at every client deadline on
    /// the way to tick everyone.
    pub async fn run_for(&mut self, duration: Duration) {
        let end = Instant::now() + duration;
        loop {
            self.settle().await;
            let next = earliest(self.clients.iter().map(|c| c.app().next_deadline()));
            let target = next.filter(|at| *at < end).unwrap_or(end);

            let now = Instant::now();
            if target > now {
                tokio::time::advance(target - now).await;
            }
            for client in &mut self.clients {
                client.tick().await;
            }
            self.settle().await;

            if target >= end {
                return;
            }
        }
    }
}
