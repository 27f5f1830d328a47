//! HTTP credential client.

use async_trait::async_trait;
use oche_core::{JoinGrant, Role};
use serde::Deserialize;
use tracing::{debug, error};

use crate::{error::ClientError, traits::TokenProvider};

/// Path of the credential endpoint below the base URL.
const TOKEN_PATH: &str = "/api/livekit/token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    ws_url: String,
    room: String,
}

impl From<TokenResponse> for JoinGrant {
    fn from(response: TokenResponse) -> Self {
        Self { token: response.token, server_url: response.ws_url, room_id: response.room }
    }
}

/// Fetches join credentials from the web backend.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    client: reqwest::Client,
    base_url: String,
    room: Option<String>,
}

impl HttpTokenProvider {
    /// Provider for the backend at `base_url`, using its default room.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client: reqwest::Client::new(), base_url, room: None }
    }

    /// Ask for a specific room instead of the backend default.
    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    fn request(&self, name: &str, role: Role) -> reqwest::RequestBuilder {
        let streamer = if role.can_publish() { "true" } else { "false" };
        let mut query = vec![("name", name), ("streamer", streamer)];
        if let Some(room) = &self.room {
            query.push(("room", room.as_str()));
        }
        self.client.get(format!("{}{TOKEN_PATH}", self.base_url)).query(&query)
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn issue(&self, name: &str, role: Role) -> Result<JoinGrant, ClientError> {
        debug!(name, ?role, "requesting join token");
        let response = self
            .request(name, role)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .inspect_err(|e| error!(error = %e, "token request failed"))?;

        let body: TokenResponse = response.json().await?;
        Ok(body.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_name_and_role() {
        let provider = HttpTokenProvider::new("http://localhost:4321/");
        let request = provider.request("Phil Taylor", Role::Streamer).build().unwrap();

        assert_eq!(
            request.url().as_str(),
            "http://localhost:4321/api/livekit/token?name=Phil+Taylor&streamer=true"
        );
    }

    #[test]
    fn request_names_room_when_configured() {
        let provider = HttpTokenProvider::new("http://localhost:4321").with_room("finals");
        let request = provider.request("viewer", Role::Viewer).build().unwrap();

        assert_eq!(request.url().query(), Some("name=viewer&streamer=false&room=finals"));
    }

    #[test]
    fn response_maps_to_grant() {
        let body = r#"{"token":"eyJ","wsUrl":"wss://rtc.example","room":"fuelldart"}"#;
        let grant: JoinGrant = serde_json::from_str::<TokenResponse>(body).unwrap().into();

        assert_eq!(
            grant,
            JoinGrant {
                token: "eyJ".into(),
                server_url: "wss://rtc.example".into(),
                room_id: "fuelldart".into(),
            }
        );
    }

    #[test]
    fn error_body_is_rejected() {
        let body = r#"{"error":"Participant name is required"}"#;
        assert!(serde_json::from_str::<TokenResponse>(body).is_err());
    }
}
