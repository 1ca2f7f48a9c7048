use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::allow_list::AllowList;
use crate::channel::ChannelRoots;
use crate::env::{self, ReadEnv};
use crate::feed::FeedConfig;
use crate::publisher::MirrorMode;

pub const CONFIG_FILE_NAME: &str = "release-hook.toml";
const APP_DIR: &str = "release-hook";
const API_SECRET_ENV: &str = "API_SECRET";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 9090;
const DEFAULT_FEED_COUNT: usize = 30;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_REPO_BASE_URL: &str = "https://github.com";
const DEFAULT_NONCE_DB: &str = "~/.release.db";
const DEFAULT_SMTP_PORT: u16 = 587;

/// Used when no configuration file is found.
pub const DEFAULT_CONFIG: &str = r#"
[web]
# http server host and port
debug = false
host = "localhost"
port = 9090
# log file; empty logs to stdout
log = "/tmp/release-server.log"

[path]
# final release tarballs
release = "/tmp/release"
# pre-release tarballs
pre-release = "/tmp/prerelease"
# draft tarballs
draft = "/tmp/draft"
# source archive, final releases are mirrored here; empty disables mirroring and the feed
source = "/tmp/sources"
# symlink into the source archive instead of copying
# symlink_in_source = true

# extra path segment before the channel version, per project
[path.project_segments]
mate-themes = "themes"

[rss]
title = "MATE releases"
description = "RSS feed for MATE releases"
link = "https://pub.mate-desktop.org/rss.xml"
# feed file; empty disables feed updates
path = "/tmp/rss.xml"
# maximum number of items
count = 30
# download base URL, {name} {version} and {channel_version} are substituted
url_prefix = "https://pub.mate-desktop.org/sources/{name}/{channel_version}"

[security]
# HMAC secret shared with the CI; falls back to $API_SECRET, empty disables signature checks
api_secret = "it is a secret string"
# "organization/repo" entries, "*" allows any repository
allow_repos = [
    "mate-desktop/marco",
    "*",
]
# literal addresses or CIDR blocks
allow_ips = [
    "127.0.0.1",
    "::1",
]
# nonce_db = "~/.release.db"
# repo_base_url = "https://github.com"

[download]
# per-file download timeout
timeout_secs = 300

# notification mail server
[mail]
smtp_host = ""
smtp_port = 587
username = ""
password = ""
sender_nick = "Notify"
sender = "nobody@example.com"
receivers = ["abc@example.com"]
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config {origin}: {source}")]
    Parse {
        origin: String,
        source: toml::de::Error,
    },
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file found; `searched` lists every location tried.
    Builtin { searched: Vec<PathBuf> },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub web: WebConfig,
    pub path: PathConfig,
    pub rss: RssConfig,
    pub security: SecurityConfig,
    pub download: DownloadConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub debug: bool,
    pub host: String,
    pub port: u16,
    /// Log file; empty means stdout.
    pub log: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            debug: false,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub release: PathBuf,
    #[serde(rename = "pre-release")]
    pub prerelease: PathBuf,
    pub draft: PathBuf,
    /// Empty disables mirroring.
    pub source: String,
    pub symlink_in_source: bool,
    pub project_segments: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RssConfig {
    pub title: String,
    pub description: String,
    pub link: String,
    /// Empty disables feed updates.
    pub path: String,
    pub count: usize,
    pub url_prefix: String,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            link: String::new(),
            path: String::new(),
            count: DEFAULT_FEED_COUNT,
            url_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_secret: String,
    pub allow_repos: Vec<String>,
    pub allow_ips: Vec<String>,
    pub repo_base_url: String,
    pub nonce_db: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_secret: String::new(),
            allow_repos: Vec::new(),
            allow_ips: Vec::new(),
            repo_base_url: DEFAULT_REPO_BASE_URL.to_string(),
            nonce_db: DEFAULT_NONCE_DB.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// Notification mail settings. Parsed and carried, not used by the service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
    pub sender_nick: String,
    pub receivers: Vec<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: DEFAULT_SMTP_PORT,
            username: String::new(),
            password: String::new(),
            sender: String::new(),
            sender_nick: String::new(),
            receivers: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<inline>")
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::parse(DEFAULT_CONFIG, "<built-in>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Lookup order: next to the executable, per-user, system-wide.
    pub fn candidate_paths<E: ReadEnv>(env: &E, exe_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = exe_dir {
            paths.push(dir.join(CONFIG_FILE_NAME));
        }
        if let Some(dir) = env::user_config_dir(env) {
            paths.push(dir.join(APP_DIR).join(CONFIG_FILE_NAME));
        }
        paths.push(env::system_config_dir(env).join(APP_DIR).join(CONFIG_FILE_NAME));
        paths
    }

    /// Loads `explicit` when given, else the first existing candidate, else
    /// the built-in default. Then applies environment fallbacks.
    pub fn discover<E: ReadEnv>(
        env: &E,
        explicit: Option<&Path>,
        exe_dir: Option<&Path>,
    ) -> Result<(Self, ConfigSource), ConfigError> {
        let (mut config, source) = match explicit {
            Some(path) => (Self::from_file(path)?, ConfigSource::File(path.to_path_buf())),
            None => {
                let searched = Self::candidate_paths(env, exe_dir);
                match searched.iter().find(|p| p.is_file()) {
                    Some(path) => (Self::from_file(path)?, ConfigSource::File(path.clone())),
                    None => (Self::builtin()?, ConfigSource::Builtin { searched }),
                }
            }
        };
        config.apply_env(env);
        Ok((config, source))
    }

    /// An empty `api_secret` falls back to `$API_SECRET`.
    pub fn apply_env<E: ReadEnv>(&mut self, env: &E) {
        if self.security.api_secret.is_empty()
            && let Ok(secret) = env.var(API_SECRET_ENV)
        {
            self.security.api_secret = secret;
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.web.host, self.web.port)
    }

    pub fn allow_list(&self) -> AllowList {
        AllowList::new(
            &self.security.allow_ips,
            &self.security.allow_repos,
            self.security.repo_base_url.as_str(),
        )
    }

    pub fn channel_roots(&self) -> ChannelRoots {
        ChannelRoots {
            release: self.path.release.clone(),
            prerelease: self.path.prerelease.clone(),
            draft: self.path.draft.clone(),
            source: non_empty(&self.path.source).map(PathBuf::from),
        }
    }

    pub fn project_segments(&self) -> HashMap<String, String> {
        self.path.project_segments.clone()
    }

    pub fn mirror_mode(&self) -> MirrorMode {
        if self.path.symlink_in_source {
            MirrorMode::Symlink
        } else {
            MirrorMode::Copy
        }
    }

    /// `None` when no feed path is configured.
    pub fn feed_config(&self) -> Option<FeedConfig> {
        non_empty(&self.rss.path).map(|path| FeedConfig {
            title: self.rss.title.clone(),
            description: self.rss.description.clone(),
            link: self.rss.link.clone(),
            path: PathBuf::from(path),
            count: self.rss.count,
            url_prefix: self.rss.url_prefix.clone(),
        })
    }

    pub fn nonce_db_path<E: ReadEnv>(&self, env: &E) -> PathBuf {
        env::expand_home(env, &self.security.nonce_db)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download.timeout_secs)
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        non_empty(&self.web.log).map(PathBuf::from)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
