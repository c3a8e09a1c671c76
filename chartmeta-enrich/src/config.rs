//! Credential resolution for the lookup service
//!
//! Client id and secret each resolve CLI → ENV → TOML.

use chartmeta_common::config::{resolve_secret, TomlConfig};
use chartmeta_common::{Error, Result};

pub const CLIENT_ID_ENV_VAR: &str = "CHARTMETA_SPOTIFY_CLIENT_ID";
pub const CLIENT_SECRET_ENV_VAR: &str = "CHARTMETA_SPOTIFY_CLIENT_SECRET";

/// Client-credentials pair for the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

// Keep the secret out of logs
impl std::fmt::Debug for SpotifyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Resolve both credential parts
pub fn resolve_spotify_credentials(
    cli_client_id: Option<&str>,
    cli_client_secret: Option<&str>,
    toml_config: &TomlConfig,
) -> Result<SpotifyCredentials> {
    let client_id = resolve_secret(
        "Spotify client id",
        cli_client_id,
        CLIENT_ID_ENV_VAR,
        toml_config.spotify.client_id.as_deref(),
    );
    let client_secret = resolve_secret(
        "Spotify client secret",
        cli_client_secret,
        CLIENT_SECRET_ENV_VAR,
        toml_config.spotify.client_secret.as_deref(),
    );

    match (client_id, client_secret) {
        (Some((client_id, _)), Some((client_secret, _))) => Ok(SpotifyCredentials {
            client_id,
            client_secret,
        }),
        (id, secret) => {
            let missing: Vec<&str> = [(id.is_none(), "client id"), (secret.is_none(), "client secret")]
                .into_iter()
                .filter(|(absent, _)| *absent)
                .map(|(_, name)| name)
                .collect();
            Err(Error::Config(format!(
                "Spotify {} not configured. Please configure using one of:\n\
                 1. Command line: --client-id <id> --client-secret <secret>\n\
                 2. Environment: {}=... {}=...\n\
                 3. TOML config: [spotify] client_id = \"...\", client_secret = \"...\"\n\
                 \n\
                 Register an application at: https://developer.spotify.com/dashboard",
                missing.join(" and "),
                CLIENT_ID_ENV_VAR,
                CLIENT_SECRET_ENV_VAR
            )))
        }
    }
}
