//! Deterministic simulation harness for oche.
//!
//! In-memory implementations of every collaborator trait, so full client
//! runtimes can be run against each other on tokio's paused clock:
//!
//! - [`SimRoom`] / [`SimSession`]: the room service, with fault injection
//!   (transport loss, refused connects, kicks, shutdown)
//! - [`SimPlatform`]: capture devices, permission denial, hot-plug and
//!   native capture termination
//! - [`SimTokens`]: the credential endpoint
//! - [`SimEnv`]: tokio time plus a seeded `ChaCha8` RNG
//! - [`SimWorld`]: many clients, one room, one clock
//!
//! Given the same seed and the same script, a run is reproducible down to the
//! order of every event.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_env;
pub mod sim_platform;
pub mod sim_room;
pub mod sim_tokens;

pub use scenario::{ClientId, SimClient, SimWorld};
pub use sim_env::SimEnv;
pub use sim_platform::{CaptureSource, SimPlatform};
pub use sim_room::{IDENTITY_PREFIX, SimRoom, SimSession};
pub use sim_tokens::SimTokens;
