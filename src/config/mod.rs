use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use platform_dirs::AppDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::files::FileReferenceProvider;

pub(crate) mod duration;
pub(crate) mod files;

#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub email: String,
    pub dev_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

const fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    format!("datablob/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Configuration {
    /// Base URL of the versioning backend.
    pub url: String,
    pub credentials: Option<Credentials>,
    /// Longest silence tolerated while reading a response, and the total
    /// deadline for a locator call. Artifact downloads have no total deadline.
    #[serde(with = "crate::config::duration", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(with = "crate::config::duration", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub verify_checksums: bool,
}

impl Configuration {
    /// Layers defaults, the per-user config file, any explicit files (in
    /// order) and finally `DATABLOB_*` environment variables.
    pub fn figment(configs: Vec<PathBuf>) -> Figment {
        let fig = Figment::from(Serialized::defaults(Configuration::default()));

        let fig = match AppDirs::new(Some("datablob"), true) {
            Some(app_dirs) if app_dirs.config_dir.join("config.yaml").exists() => fig.admerge(
                FileReferenceProvider::new(Yaml::file(app_dirs.config_dir.join("config.yaml"))),
            ),
            _ => fig,
        };

        let fig = configs.into_iter().fold(fig, |fig, config_path| {
            fig.admerge(FileReferenceProvider::new(Yaml::file(config_path)))
        });

        fig.admerge(FileReferenceProvider::new(
            Env::prefixed("DATABLOB_").split("__"),
        ))
    }

    pub fn config(figment: Figment) -> Result<Configuration> {
        let config: Configuration = figment.extract().context("Failed to load configuration")?;

        let url = config.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("url must use http or https, not {}", url.scheme());
        }

        Ok(config)
    }

    pub fn load(configs: Vec<PathBuf>) -> Result<Configuration> {
        Self::config(Self::figment(configs))
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.url).with_context(|| format!("Invalid backend url {:?}", self.url))
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".into(),
            credentials: None,
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
            verify_checksums: false,
        }
    }
}
