//! Downloads release artifacts into their channel directory.
//!
//! Publication is best-effort per file: a file that already exists on a
//! non-overwritable channel, fails to download or has the wrong size is
//! recorded in the [`PublishReport`] and the remaining files still go out.
//! The release-notes file is always written once the downloads are done.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::channel::Route;
use crate::release::{Release, ReleaseFile};

/// Header line the build system prepends to generated notes.
pub const NOTES_MARKER: &str = "Changes since the last release:";

/// How published files are placed into the source archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorMode {
    #[default]
    Copy,
    Symlink,
}

/// Failure of a single file. Never aborts the release.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("{} already exists and the channel does not allow overwrites", .0.display())]
    AlreadyExists(PathBuf),

    #[error("refusing unsafe file name {0:?}")]
    UnsafeName(String),

    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("upstream answered {0}")]
    Status(StatusCode),

    #[error("size mismatch: declared {declared} bytes, received {received}")]
    SizeMismatch { declared: u64, received: u64 },

    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot mirror to {}: {source}", path.display())]
    Mirror {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure that stops publication of the whole release.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("release name or version is not a safe path component: {0:?}")]
    UnsafeRelease(String),

    #[error("cannot create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write release notes {}: {source}", path.display())]
    Notes {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Default)]
pub struct PublishReport {
    /// Files now present in the destination, in payload order.
    pub published: Vec<PathBuf>,
    /// Per-file failures as `(file name, error)`.
    pub failures: Vec<(String, FileError)>,
    pub notes: PathBuf,
    /// Entries created in the source archive.
    pub mirrored: Vec<PathBuf>,
}

impl PublishReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ArtifactPublisher {
    http: reqwest::Client,
    mirror_mode: MirrorMode,
}

impl ArtifactPublisher {
    /// `download_timeout` bounds each individual download, headers and body.
    pub fn new(download_timeout: Duration, mirror_mode: MirrorMode) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(download_timeout)
            .user_agent(concat!("release-hook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, mirror_mode))
    }

    pub fn with_client(http: reqwest::Client, mirror_mode: MirrorMode) -> Self {
        Self { http, mirror_mode }
    }

    pub async fn publish(&self, release: &Release, route: &Route) -> Result<PublishReport, PublishError> {
        for component in [&release.name, &release.version] {
            if !is_safe_component(component) {
                return Err(PublishError::UnsafeRelease(component.clone()));
            }
        }

        create_dir(&route.destination).await?;
        if let Some(mirror) = &route.mirror {
            create_dir(mirror).await?;
        }

        let mut report = PublishReport::default();

        for file in &release.files {
            match self.publish_file(file, route).await {
                Ok(path) => {
                    info!(file = %file.name, path = %path.display(), "Published artifact");
                    if let Some(mirror) = &route.mirror {
                        match self.mirror(&path, mirror).await {
                            Ok(entry) => report.mirrored.push(entry),
                            Err(e) => {
                                warn!(file = %file.name, error = %e, "Mirroring artifact failed");
                                report.failures.push((file.name.clone(), e));
                            }
                        }
                    }
                    report.published.push(path);
                }
                Err(e) => {
                    warn!(file = %file.name, url = %file.url, error = %e, "Artifact not published");
                    report.failures.push((file.name.clone(), e));
                }
            }
        }

        let notes = route.destination.join(release.notes_file_name());
        tokio::fs::write(&notes, render_notes(&release.news))
            .await
            .map_err(|source| PublishError::Notes {
                path: notes.clone(),
                source,
            })?;
        if let Some(mirror) = &route.mirror {
            match self.mirror(&notes, mirror).await {
                Ok(entry) => report.mirrored.push(entry),
                Err(e) => {
                    warn!(error = %e, "Mirroring release notes failed");
                    report.failures.push((release.notes_file_name(), e));
                }
            }
        }
        report.notes = notes;

        Ok(report)
    }

    async fn publish_file(&self, file: &ReleaseFile, route: &Route) -> Result<PathBuf, FileError> {
        if !is_safe_component(&file.name) {
            return Err(FileError::UnsafeName(file.name.clone()));
        }

        let path = route.destination.join(&file.name);
        if !route.overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(FileError::AlreadyExists(path));
        }

        let part = part_file(&route.destination, &file.name).map_err(|source| FileError::Io {
            path: route.destination.clone(),
            source,
        })?;
        // The part file is removed on drop if anything below fails.
        self.download(&file.url, &part, file.size).await?;

        let persisted = if route.overwrite {
            part.persist(&path)
        } else {
            part.persist_noclobber(&path)
        };
        match persisted {
            Ok(_) => Ok(path),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(FileError::AlreadyExists(path))
            }
            Err(e) => Err(FileError::Io {
                path,
                source: e.error,
            }),
        }
    }

    /// Streams `url` into `part`, stopping early once more than `declared` bytes arrive.
    async fn download(&self, url: &str, part: &NamedTempFile, declared: u64) -> Result<(), FileError> {
        debug!(url, path = %part.path().display(), "Downloading");
        let mut response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FileError::Status(response.status()));
        }

        let io_err = |source| FileError::Io {
            path: part.path().to_path_buf(),
            source,
        };
        let mut out = tokio::fs::File::from_std(part.reopen().map_err(io_err)?);
        let mut received: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            received += chunk.len() as u64;
            if received > declared {
                return Err(FileError::SizeMismatch { declared, received });
            }
            out.write_all(&chunk).await.map_err(io_err)?;
        }
        out.flush().await.map_err(io_err)?;

        if received != declared {
            return Err(FileError::SizeMismatch { declared, received });
        }
        Ok(())
    }

    /// Places `src` into `mirror_dir`, replacing any existing entry.
    async fn mirror(&self, src: &Path, mirror_dir: &Path) -> Result<PathBuf, FileError> {
        let Some(name) = src.file_name() else {
            return Err(FileError::UnsafeName(src.display().to_string()));
        };
        let dst = mirror_dir.join(name);
        let mirror_err = |source| FileError::Mirror {
            path: dst.clone(),
            source,
        };

        if tokio::fs::symlink_metadata(&dst).await.is_ok() {
            tokio::fs::remove_file(&dst).await.map_err(mirror_err)?;
        }

        match self.mirror_mode {
            MirrorMode::Copy => {
                tokio::fs::copy(src, &dst).await.map_err(mirror_err)?;
            }
            MirrorMode::Symlink => {
                let target = tokio::fs::canonicalize(src).await.map_err(mirror_err)?;
                symlink(&target, &dst).await.map_err(mirror_err)?;
            }
        }
        Ok(dst)
    }
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_file(target, link).await
}

/// Uniquely named `.<name>.XXXXXX.part` sibling of the final file.
fn part_file(dir: &Path, name: &str) -> std::io::Result<NamedTempFile> {
    let prefix = format!(".{name}.");
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(".part");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    builder.tempfile_in(dir)
}

async fn create_dir(path: &Path) -> Result<(), PublishError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| PublishError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

/// A single normal path component: no separators, no `.`/`..`, not empty.
fn is_safe_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Notes as written to `<name>-<version>.news`.
///
/// The first line carrying [`NOTES_MARKER`] is dropped and the text ends with
/// exactly one newline.
pub fn render_notes(news: &str) -> String {
    let mut lines: Vec<&str> = news.lines().collect();
    if let Some(pos) = lines.iter().position(|line| line.contains(NOTES_MARKER)) {
        lines.remove(pos);
    }
    let mut notes = lines.join("\n").trim_end_matches(['\n', '\r']).to_string();
    notes.push('\n');
    notes
}
