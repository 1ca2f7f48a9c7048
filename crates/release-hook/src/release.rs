//! Payload posted by the build system for one release.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer};

/// One downloadable artifact of a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseFile {
    pub name: String,
    /// Declared size in bytes; the downloaded byte count must match exactly.
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Release {
    pub name: String,
    pub version: String,
    pub tag: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub news: String,
    #[serde(default)]
    pub created_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub published_at: Option<DateTime<FixedOffset>>,
    #[serde(deserialize_with = "non_empty_files")]
    pub files: Vec<ReleaseFile>,
}

fn non_empty_files<'de, D>(deserializer: D) -> Result<Vec<ReleaseFile>, D::Error>
where
    D: Deserializer<'de>,
{
    let files = Vec::<ReleaseFile>::deserialize(deserializer)?;
    if files.is_empty() {
        return Err(serde::de::Error::invalid_length(0, &"at least one file"));
    }
    Ok(files)
}

impl Release {
    /// `major.minor` prefix of the version, e.g. `1.2` for `1.2.3`.
    pub fn channel_version(&self) -> String {
        self.version
            .split('.')
            .take(2)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// `<name>-<version>`, used for the notes file name and the feed guid.
    pub fn stem(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    pub fn notes_file_name(&self) -> String {
        format!("{}.news", self.stem())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn release(name: &str, version: &str, files: Vec<ReleaseFile>) -> Release {
        Release {
            name: name.to_string(),
            version: version.to_string(),
            tag: format!("v{version}"),
            draft: false,
            prerelease: false,
            news: String::new(),
            created_at: None,
            published_at: None,
            files,
        }
    }

    pub fn file(name: &str, size: u64, url: &str) -> ReleaseFile {
        ReleaseFile {
            name: name.to_string(),
            size,
            url: url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::release;
    use super::*;

    #[test]
    fn channel_version_takes_major_minor() {
        assert_eq!(release("foo", "1.2.3", vec![]).channel_version(), "1.2");
        assert_eq!(release("foo", "1.26.0.1", vec![]).channel_version(), "1.26");
        assert_eq!(release("foo", "7", vec![]).channel_version(), "7");
    }

    #[test]
    fn decodes_full_payload() {
        let body = r#"{
            "name": "docker-build",
            "version": "1.3.3",
            "tag": "1.3.3",
            "draft": false,
            "prerelease": true,
            "news": "notes",
            "created_at": "2026-10-19T08:00:00+00:00",
            "published_at": "2026-10-19T09:30:00+02:00",
            "files": [{"name": "NEWS", "size": 6396, "url": "https://github.com/yetist/docker-build/releases/download/v1.3.3/NEWS"}]
        }"#;

        let release: Release = serde_json::from_str(body).unwrap();

        assert!(release.prerelease);
        assert!(!release.draft);
        assert_eq!(release.files.len(), 1);
        assert_eq!(release.files[0].size, 6396);
        assert_eq!(
            release.published_at.unwrap().to_rfc3339(),
            "2026-10-19T09:30:00+02:00"
        );
        assert_eq!(release.notes_file_name(), "docker-build-1.3.3.news");
    }

    #[test]
    fn optional_fields_default() {
        let body = r#"{"name":"foo","version":"1.0.0","tag":"v1.0.0","files":[{"name":"a","size":1,"url":"u"}]}"#;
        let release: Release = serde_json::from_str(body).unwrap();

        assert!(!release.draft);
        assert!(!release.prerelease);
        assert!(release.news.is_empty());
        assert!(release.published_at.is_none());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let body = r#"{"name":"foo","version":"1.0.0","files":[{"name":"a","size":1,"url":"u"}]}"#;
        assert!(serde_json::from_str::<Release>(body).is_err());
    }

    #[test]
    fn file_without_size_is_rejected() {
        let body = r#"{"name":"foo","version":"1.0.0","tag":"t","files":[{"name":"a","url":"u"}]}"#;
        assert!(serde_json::from_str::<Release>(body).is_err());
    }

    #[test]
    fn empty_file_list_is_rejected() {
        let body = r#"{"name":"foo","version":"1.0.0","tag":"t","files":[]}"#;
        assert!(serde_json::from_str::<Release>(body).is_err());
    }
}
