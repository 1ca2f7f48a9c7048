//! Maps a release to its publication channel and destination directory.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::release::Release;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Draft,
    PreRelease,
    Final,
}

impl Channel {
    /// Draft wins over pre-release, which wins over final.
    pub fn of(release: &Release) -> Self {
        if release.draft {
            Self::Draft
        } else if release.prerelease {
            Self::PreRelease
        } else {
            Self::Final
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PreRelease => "prerelease",
            Self::Final => "release",
        }
    }

    /// Final releases are immutable once published.
    pub fn allows_overwrite(self) -> bool {
        !matches!(self, Self::Final)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filesystem roots of the publication tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRoots {
    pub release: PathBuf,
    pub prerelease: PathBuf,
    pub draft: PathBuf,
    /// Source archive; final releases are mirrored here when set.
    pub source: Option<PathBuf>,
}

/// Where and how one release gets published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub channel: Channel,
    pub destination: PathBuf,
    pub overwrite: bool,
    /// `source/<name>/<channel_version>` for mirrored final releases.
    pub mirror: Option<PathBuf>,
}

impl Route {
    /// The feed only tracks final releases that are mirrored into the source archive.
    pub fn feeds_syndication(&self) -> bool {
        self.channel == Channel::Final && self.mirror.is_some()
    }
}

pub struct ChannelRouter {
    roots: ChannelRoots,
    /// Extra path segment inserted before the channel version, per project.
    project_segments: HashMap<String, String>,
}

impl ChannelRouter {
    pub fn new(roots: ChannelRoots, project_segments: HashMap<String, String>) -> Self {
        Self {
            roots,
            project_segments,
        }
    }

    pub fn roots(&self) -> &ChannelRoots {
        &self.roots
    }

    pub fn route(&self, release: &Release) -> Route {
        let channel = Channel::of(release);
        let root = match channel {
            Channel::Draft => &self.roots.draft,
            Channel::PreRelease => &self.roots.prerelease,
            Channel::Final => &self.roots.release,
        };

        let channel_version = release.channel_version();
        let mut destination = root.clone();
        if let Some(segment) = self.project_segments.get(&release.name) {
            destination.push(segment);
        }
        destination.push(&channel_version);

        let mirror = match channel {
            Channel::Final => self
                .roots
                .source
                .as_ref()
                .map(|source| source.join(&release.name).join(&channel_version)),
            _ => None,
        };

        Route {
            channel,
            destination,
            overwrite: channel.allows_overwrite(),
            mirror,
        }
    }
}
