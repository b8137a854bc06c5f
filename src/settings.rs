use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::fetch::FetchPolicy;
use crate::sites::{self, SiteProfile};

pub const DEFAULT_CONFIG_FILE: &str = "tabak_scraper.toml";
const ENV_PREFIX: &str = "TABAK";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Run settings after defaults, config file and `TABAK_*` environment are merged.
/// CLI flags are applied on top by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub delay_secs: f64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_secs: f64,
    pub workers: usize,
    pub user_agent: String,
    pub output: PathBuf,
    pub require_flavor: bool,
    #[serde(default)]
    pub seeds: Vec<PathBuf>,
    /// Extra or overriding site profiles, keyed by name.
    #[serde(default)]
    pub sites: HashMap<String, SiteProfile>,
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    fn load_from(path: Option<&Path>, env: Environment) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .set_default("delay_secs", 0.6)?
            .set_default("timeout_secs", 25_i64)?
            .set_default("max_retries", 3_i64)?
            .set_default("backoff_secs", 1.5)?
            .set_default("workers", 4_i64)?
            .set_default("user_agent", USER_AGENT)?
            .set_default("output", "tabak.jsonl")?
            .set_default("require_flavor", false)?
            .add_source(file)
            .add_source(env)
            .build()
            .context("reading configuration")?;
        settings
            .try_deserialize()
            .context("invalid configuration")
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        self.fetch_policy().map(|_| ())
    }

    pub fn fetch_policy(&self) -> Result<FetchPolicy> {
        let secs = |name: &str, v: f64| {
            Duration::try_from_secs_f64(v)
                .with_context(|| format!("{name} must be a non-negative number, got {v}"))
        };
        Ok(FetchPolicy {
            delay: secs("delay_secs", self.delay_secs)?,
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            backoff: secs("backoff_secs", self.backoff_secs)?,
            user_agent: self.user_agent.clone(),
        })
    }

    /// Configured profile if present, else the built-in one.
    pub fn site(&self, name: &str) -> Result<SiteProfile> {
        if let Some(profile) = self.sites.get(name) {
            let mut profile = profile.clone();
            if profile.name.is_empty() {
                profile.name = name.to_string();
            }
            return Ok(profile);
        }
        match sites::builtin(name) {
            Some(profile) => Ok(profile),
            None => bail!(
                "unknown site {name:?} (known: {})",
                self.site_names().join(", ")
            ),
        }
    }

    /// Built-in and configured site names, sorted.
    pub fn site_names(&self) -> Vec<String> {
        let mut names: Vec<String> = sites::BUILTIN
            .iter()
            .map(|s| s.to_string())
            .chain(self.sites.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
