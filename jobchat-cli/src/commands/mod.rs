pub mod completion;
pub mod config;
pub mod conversations;
pub mod notifications;
pub mod send;
pub mod watch;

use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use directories::BaseDirs;
use engine::{HttpSnapshotApi, SessionIdentity, SseTransport, SyncSession, SessionUpdate};
use reqwest::Client;
use shared::config::Config;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::{GlobalArgs, telemetry};

/// Resolved configuration plus credentials for a server command.
#[derive(Debug)]
pub struct SessionContext {
    pub config: Config,
    pub token: Option<String>,
}

impl SessionContext {
    /// Loads configuration from the explicit path or the default location,
    /// validates it, and installs logging.
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let path = args.config.clone().or_else(|| {
            let candidate = default_config_path();
            candidate.exists().then_some(candidate)
        });
        let config = Config::load_config(path, args.server.clone())
            .context("failed to load configuration")?;
        if let Err(problems) = config.validate() {
            bail!("invalid configuration: {}", problems.join("; "));
        }
        telemetry::initialize_tracing(&config);

        let token = args
            .token
            .clone()
            .or_else(|| env::var("JOBCHAT_TOKEN").ok())
            .filter(|token| !token.trim().is_empty());
        Ok(Self { config, token })
    }

    pub fn identity(&self, user: Uuid) -> SessionIdentity {
        let identity = SessionIdentity::new(user);
        match &self.token {
            Some(token) => identity.with_token(token.clone()),
            None => identity,
        }
    }

    pub fn snapshot_api(&self, client: Client) -> HttpSnapshotApi {
        HttpSnapshotApi::new(client, self.config.server.base_url.clone())
            .with_token(self.token.clone())
    }

    /// Builds a session over the SSE transport and the REST snapshot API.
    pub fn session(&self) -> Result<(SyncSession, UnboundedReceiver<SessionUpdate>)> {
        let client = build_client()?;
        let transport = SseTransport::new(client.clone(), &self.config)
            .context("invalid stream or events endpoint")?;
        let api = self.snapshot_api(client);
        Ok(SyncSession::new(
            Arc::new(transport),
            Arc::new(api),
            &self.config,
        ))
    }
}

pub fn default_config_path() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("jobchat").join("config.yaml"))
        .unwrap_or_else(|| PathBuf::from("./config.yaml"))
}

pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent("jobchat-cli")
        .build()
        .context("failed to build HTTP client")
}
