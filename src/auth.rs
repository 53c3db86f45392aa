//! Player identity and the session-server side of online-mode logins.

use anyhow::{bail, Context};
use serde::Serialize;
use std::future::Future;
use uuid::Uuid;

const JOIN_URL: &str = "https://sessionserver.mojang.com/session/minecraft/join";

/// Who is logging in.
#[derive(Clone, Default)]
pub struct Auth {
    pub name: String,
    /// Profile ID. Only needed for online mode.
    pub uuid: Option<Uuid>,
    /// Access token for the session server. Without one the login is
    /// attempted in offline mode.
    pub access_token: Option<String>,
}

impl Auth {
    pub fn offline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_online(&self) -> bool {
        self.access_token.is_some()
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("access_token", &self.access_token.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Tells the session server that a player is about to join a server,
/// identified by its server hash.
pub trait SessionService {
    fn join_server(
        &self,
        auth: &Auth,
        server_hash: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// For offline-mode servers: nothing to tell anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSession;

impl SessionService for OfflineSession {
    async fn join_server(&self, _auth: &Auth, _server_hash: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Mojang's session server.
#[derive(Debug, Clone)]
pub struct MojangSessionService {
    client: reqwest::Client,
    url: String,
}

impl MojangSessionService {
    pub fn new() -> Self {
        Self::with_url(JOIN_URL)
    }

    /// Talks to a compatible session server at `url` instead.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Default for MojangSessionService {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest<'a> {
    access_token: &'a str,
    selected_profile: String,
    server_id: &'a str,
}

impl SessionService for MojangSessionService {
    async fn join_server(&self, auth: &Auth, server_hash: &str) -> anyhow::Result<()> {
        let access_token = auth
            .access_token
            .as_deref()
            .context("online login requires an access token")?;
        let uuid = auth.uuid.context("online login requires a profile UUID")?;

        let response = self
            .client
            .post(&self.url)
            .json(&JoinRequest {
                access_token,
                selected_profile: uuid.simple().to_string(),
                server_id: server_hash,
            })
            .send()
            .await
            .context("session server request failed")?;

        let status = response.status();
        tracing::debug!("Session server answered {status}");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("session server rejected join ({status}): {body}");
        }
        Ok(())
    }
}
