//! # release-hook
//!
//! Webhook that publishes software releases announced by a build system.
//!
//! ## How it works
//!
//! 1. The build system sends `POST /release` with a JSON release description
//!    and the `X-Build-Nonce` / `X-Build-Signature` headers.
//! 2. The request is admitted only if the client address is allow-listed, the
//!    nonce has never been seen, the HMAC-SHA256 of `nonce || body` matches,
//!    and every artifact URL belongs to an allowed repository.
//! 3. The release is routed to the draft, pre-release or final tree under
//!    `<root>/[segment]/<major.minor>`. Final releases are never overwritten.
//! 4. Artifacts are downloaded and size-checked one by one; a failing file
//!    does not stop the others. The notes file `<name>-<version>.news` is
//!    always written.
//! 5. Final releases are mirrored into the source archive and, when a feed
//!    path is configured, added to the RSS feed.
//!
//! The four trees are also served read-only under `/draft/`, `/prerelease/`,
//! `/release/` and `/sources/`.
//!
//! ## Configuration (TOML)
//!
//! Looked up in `--config`, next to the executable,
//! `$XDG_CONFIG_HOME/release-hook/`, then `$XDG_CONFIG_DIRS/release-hook/`.
//!
//! | Key | Default | Description |
//! |---|---|---|
//! | `web.host` / `web.port` | `localhost` / `9090` | Listening address |
//! | `web.debug` | `false` | Debug log level |
//! | `web.log` | unset | Append logs to this file instead of stdout |
//! | `path.release` / `path.pre-release` / `path.draft` | unset | Channel roots |
//! | `path.source` | unset | Source archive; enables mirroring and the feed |
//! | `path.symlink_in_source` | `false` | Symlink instead of copy into the archive |
//! | `path.project_segments` | none | Extra path segment per project name |
//! | `rss.path` | unset | Feed file; empty disables feed updates |
//! | `rss.count` | `30` | Maximum feed items |
//! | `rss.url_prefix` | unset | Download base URL (`{name}`, `{version}`, `{channel_version}`) |
//! | `security.api_secret` | `$API_SECRET` | HMAC secret; empty disables signature checks |
//! | `security.allow_ips` | empty | Addresses or CIDR blocks; empty allows all |
//! | `security.allow_repos` | empty | `org/repo` or `*`; empty allows all |
//! | `security.nonce_db` | `~/.release.db` | SQLite nonce store |
//! | `download.timeout_secs` | `300` | Per-file download timeout |

pub mod allow_list;
pub mod channel;
pub mod config;
pub mod env;
pub mod feed;
pub mod publisher;
pub mod release;
pub mod replay;
pub mod server;
pub mod signature;
pub mod validator;

pub use config::Config;
pub use release::{Release, ReleaseFile};
pub use server::{AppState, app, serve};
