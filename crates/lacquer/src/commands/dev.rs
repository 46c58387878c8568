//! Development command: build, watch and serve.

use anyhow::Result;
use lacquer_pipeline::{Config, ServeMode};

use crate::tasks::DEFAULT;

/// Server settings given on the command line.
#[derive(Debug, Default)]
pub struct ServerOverrides {
    pub port: Option<u16>,
    pub open: Option<bool>,
    pub proxy: Option<String>,
}

impl ServerOverrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(open) = self.open {
            config.server.open = open;
        }
        if let Some(backend) = self.proxy {
            config.server.mode = ServeMode::Proxy { backend };
        }
    }
}

/// Run the `default` task with server overrides applied.
pub async fn run(mut config: Config, overrides: ServerOverrides) -> Result<()> {
    overrides.apply(&mut config);
    tracing::info!(
        "Starting development server on port {}",
        config.server.port
    );
    super::run::run(config, &[DEFAULT.to_string()]).await
}
