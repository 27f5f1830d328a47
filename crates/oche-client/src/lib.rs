//! Oche client: application state and async runtime.
//!
//! This crate glues the Sans-IO machines of `oche-core` to the outside world:
//!
//! ```text
//! oche-client
//!   ├─ App             (owns every core machine; events in, actions out)
//!   ├─ Runtime         (executes actions against the collaborator traits)
//!   ├─ Session / MediaPlatform / TokenProvider (collaborator surfaces)
//!   ├─ HttpTokenProvider (credential endpoint over HTTP)
//!   ├─ LayoutStore     (panel layout persistence)
//!   ├─ ClientConfig    (JSON configuration)
//!   └─ SystemEnv       (production Environment impl)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod error;
pub mod layout_store;
pub mod runtime;
pub mod system_env;
pub mod token;
pub mod traits;

pub use app::{App, AppAction, AppEvent};
pub use config::ClientConfig;
pub use error::ClientError;
pub use layout_store::LayoutStore;
pub use runtime::Runtime;
pub use system_env::SystemEnv;
pub use token::HttpTokenProvider;
pub use traits::{
    LocalParticipant, MediaPlatform, PlatformEvent, Session, Subscription, TokenProvider,
};
