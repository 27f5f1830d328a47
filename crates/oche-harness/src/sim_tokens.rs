//! Credential endpoint backed by a [`SimRoom`].

use async_trait::async_trait;
use oche_client::{ClientError, TokenProvider};
use oche_core::{JoinGrant, Role};

use crate::sim_room::SimRoom;

/// Issues grants for one simulated room.
#[derive(Debug, Clone)]
pub struct SimTokens {
    room: SimRoom,
}

impl SimTokens {
    /// Provider for `room`.
    pub fn new(room: SimRoom) -> Self {
        Self { room }
    }
}

#[async_trait]
impl TokenProvider for SimTokens {
    async fn issue(&self, name: &str, role: Role) -> Result<JoinGrant, ClientError> {
        self.room.issue(name, role)
    }
}
