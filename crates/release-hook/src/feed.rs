//! RSS 2.0 feed of the latest final releases.
//!
//! The feed file is the only state: it is read, one item is inserted, items
//! are re-sorted newest first and truncated, and the document is written to
//! a temporary file that then replaces the original.

use std::cmp::Ordering;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use pulldown_cmark::{Parser, html};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::release::Release;

/// RFC 1123 with a numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 -0700`.
const RFC1123Z: &str = "%a, %d %b %Y %H:%M:%S %z";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("cannot read feed {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse feed: {0}")]
    Parse(#[from] quick_xml::DeError),

    #[error("cannot serialize feed: {0}")]
    Serialize(#[from] quick_xml::SeError),

    #[error("cannot write feed {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "rss")]
pub struct Rss {
    #[serde(rename = "@version", default = "default_rss_version")]
    pub version: String,
    pub channel: FeedChannel,
}

fn default_rss_version() -> String {
    "2.0".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedChannel {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(rename = "lastBuildDate", default)]
    pub last_build_date: String,
    #[serde(rename = "pubDate", default)]
    pub pub_date: String,
    #[serde(rename = "item", default)]
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub guid: String,
    #[serde(rename = "pubDate", default)]
    pub pub_date: String,
}

impl FeedItem {
    fn published(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc2822(&self.pub_date).ok()
    }
}

/// The `[rss]` configuration slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub title: String,
    pub description: String,
    pub link: String,
    pub path: PathBuf,
    pub count: usize,
    /// Download base URL; `{name}`, `{version}` and `{channel_version}` are substituted.
    pub url_prefix: String,
}

pub struct FeedUpdater {
    config: FeedConfig,
}

impl FeedUpdater {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Inserts `release` into the feed. `now` stamps `lastBuildDate` and
    /// stands in for a missing publish date.
    pub fn update(&self, release: &Release, now: DateTime<FixedOffset>) -> Result<(), FeedError> {
        let path = &self.config.path;
        let raw = std::fs::read_to_string(path).map_err(|source| FeedError::Read {
            path: path.clone(),
            source,
        })?;
        let mut feed: Rss = quick_xml::de::from_str(&raw)?;

        let item = self.entry(release, now);
        info!(guid = %item.guid, "Adding release to feed");
        let pub_date = item.pub_date.clone();
        insert_item(&mut feed.channel.items, item, self.config.count);

        let channel = &mut feed.channel;
        for (value, configured) in [
            (&mut channel.title, &self.config.title),
            (&mut channel.description, &self.config.description),
            (&mut channel.link, &self.config.link),
        ] {
            if !configured.is_empty() {
                value.clone_from(configured);
            }
        }
        channel.last_build_date = now.format(RFC1123Z).to_string();
        channel.pub_date = pub_date;

        let xml = render(&feed)?;
        replace_file(path, xml.as_bytes())?;
        debug!(path = %path.display(), items = feed.channel.items.len(), "Feed written");
        Ok(())
    }

    pub fn url_prefix(&self, release: &Release) -> String {
        self.config
            .url_prefix
            .replace("{name}", &release.name)
            .replace("{version}", &release.version)
            .replace("{channel_version}", &release.channel_version())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn entry(&self, release: &Release, now: DateTime<FixedOffset>) -> FeedItem {
        let url = self.url_prefix(release);

        let mut lines: Vec<String> = release.news.split('\n').map(str::to_owned).collect();
        lines.push(String::new());
        lines.push("---".to_string());
        lines.push(format!("[News]({url}/{})", release.notes_file_name()));
        lines.push(String::new());
        lines.push("Download".to_string());
        lines.push(String::new());
        lines.extend(
            release
                .files
                .iter()
                .map(|file| format!("- [{0}]({url}/{0})", file.name)),
        );
        lines.extend(
            release
                .files
                .iter()
                .map(|file| format!("- [{}]({}) (From Github)", file.name, file.url)),
        );
        let markdown = lines.join("\n");

        let mut description = String::new();
        html::push_html(&mut description, Parser::new(&markdown));

        FeedItem {
            title: format!("{} {}", release.name, release.version),
            description,
            link: format!("{url}/{}.tar.xz", release.stem()),
            guid: release.stem(),
            pub_date: release.published_at.unwrap_or(now).format(RFC1123Z).to_string(),
        }
    }
}

/// Appends, sorts newest first (undated items last, ties keep insertion
/// order) and truncates to `max_items`.
pub fn insert_item(items: &mut Vec<FeedItem>, item: FeedItem, max_items: usize) {
    items.push(item);
    items.sort_by(|a, b| match (a.published(), b.published()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    items.truncate(max_items);
}

fn render(feed: &Rss) -> Result<String, FeedError> {
    let mut xml = String::from(XML_DECLARATION);
    let mut serializer = quick_xml::se::Serializer::new(&mut xml);
    serializer.indent(' ', 2);
    feed.serialize(serializer)?;
    xml.push('\n');
    Ok(xml)
}

/// Write-then-rename so readers never observe a truncated feed.
fn replace_file(path: &Path, contents: &[u8]) -> Result<(), FeedError> {
    let write_err = |source| FeedError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file()
            .set_permissions(meta.permissions())
            .map_err(write_err)?;
    }
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::release::fixtures::{file, release};

    const EMPTY_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Old title</title>
    <description>Old description</description>
    <link>https://old.example.org/rss.xml</link>
    <lastBuildDate></lastBuildDate>
    <pubDate></pubDate>
  </channel>
</rss>
"#;

    fn at(hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 19, hour, 0, 0)
            .unwrap()
    }

    fn config(path: PathBuf, count: usize) -> FeedConfig {
        FeedConfig {
            title: "MATE releases".to_string(),
            description: String::new(),
            link: "https://pub.example.org/rss.xml".to_string(),
            path,
            count,
            url_prefix: "https://pub.example.org/sources/{name}/{channel_version}".to_string(),
        }
    }

    fn read(path: &Path) -> Rss {
        quick_xml::de::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn foo_release() -> Release {
        let mut rel = release(
            "foo",
            "1.2.0",
            vec![file(
                "foo-1.2.0.tar.xz",
                100,
                "https://github.com/org/foo/releases/download/v1.2.0/foo-1.2.0.tar.xz",
            )],
        );
        rel.news = "### foo 1.2.0\n\n- Fixed bug".to_string();
        rel.published_at = Some(at(9));
        rel
    }

    #[test]
    fn entry_fields() {
        let updater = FeedUpdater::new(config(PathBuf::from("rss.xml"), 30));
        let item = updater.entry(&foo_release(), at(12));

        assert_eq!(item.title, "foo 1.2.0");
        assert_eq!(item.guid, "foo-1.2.0");
        assert_eq!(item.link, "https://pub.example.org/sources/foo/1.2/foo-1.2.0.tar.xz");
        assert_eq!(item.pub_date, "Mon, 19 Oct 2026 09:00:00 +0000");
        assert!(item.description.contains("<h3>foo 1.2.0</h3>"));
        assert!(item.description.contains("<hr />"));
        assert!(item.description.contains("<p>Download</p>\n<ul>\n<li>"));
        assert!(item.description.contains(
            r#"<a href="https://pub.example.org/sources/foo/1.2/foo-1.2.0.news">News</a>"#
        ));
        assert!(item.description.contains(
            r#"<a href="https://pub.example.org/sources/foo/1.2/foo-1.2.0.tar.xz">foo-1.2.0.tar.xz</a>"#
        ));
        assert!(item.description.contains(
            r#"<a href="https://github.com/org/foo/releases/download/v1.2.0/foo-1.2.0.tar.xz">foo-1.2.0.tar.xz</a> (From Github)"#
        ));
    }

    #[test]
    fn missing_publish_date_uses_now() {
        let updater = FeedUpdater::new(config(PathBuf::from("rss.xml"), 30));
        let mut rel = foo_release();
        rel.published_at = None;

        assert_eq!(updater.entry(&rel, at(12)).pub_date, "Mon, 19 Oct 2026 12:00:00 +0000");
    }

    #[test]
    fn update_rewrites_channel_and_adds_item() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rss.xml");
        std::fs::write(&path, EMPTY_FEED).unwrap();

        FeedUpdater::new(config(path.clone(), 30))
            .update(&foo_release(), at(12))
            .unwrap();

        let feed = read(&path);
        assert_eq!(feed.version, "2.0");
        assert_eq!(feed.channel.title, "MATE releases");
        // Empty configuration keeps whatever the file had.
        assert_eq!(feed.channel.description, "Old description");
        assert_eq!(feed.channel.link, "https://pub.example.org/rss.xml");
        assert_eq!(feed.channel.last_build_date, "Mon, 19 Oct 2026 12:00:00 +0000");
        assert_eq!(feed.channel.pub_date, "Mon, 19 Oct 2026 09:00:00 +0000");
        assert_eq!(feed.channel.items.len(), 1);
        assert_eq!(feed.channel.items[0].title, "foo 1.2.0");
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("<?xml"));
    }

    #[test]
    fn keeps_most_recent_items_in_descending_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rss.xml");
        std::fs::write(&path, EMPTY_FEED).unwrap();
        let max_items = 3;
        let updater = FeedUpdater::new(config(path.clone(), max_items));

        // Inserted out of chronological order on purpose.
        for hour in [2, 5, 1, 4] {
            let mut rel = foo_release();
            rel.version = format!("1.2.{hour}");
            rel.published_at = Some(at(hour));
            updater.update(&rel, at(20)).unwrap();
        }

        let guids: Vec<String> = read(&path).channel.items.into_iter().map(|i| i.guid).collect();
        assert_eq!(guids, vec!["foo-1.2.5", "foo-1.2.4", "foo-1.2.2"]);
    }

    #[test]
    fn undated_items_sort_last() {
        let mut items = vec![FeedItem {
            guid: "undated".to_string(),
            pub_date: "garbage".to_string(),
            ..FeedItem::default()
        }];
        let dated = FeedItem {
            guid: "dated".to_string(),
            pub_date: at(3).format(RFC1123Z).to_string(),
            ..FeedItem::default()
        };

        insert_item(&mut items, dated, 10);

        assert_eq!(items[0].guid, "dated");
        assert_eq!(items[1].guid, "undated");
    }

    #[test]
    fn missing_feed_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rss.xml");

        let err = FeedUpdater::new(config(path.clone(), 30))
            .update(&foo_release(), at(12))
            .unwrap_err();

        assert!(matches!(err, FeedError::Read { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn unparseable_feed_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rss.xml");
        std::fs::write(&path, "this is not xml <").unwrap();

        let err = FeedUpdater::new(config(path.clone(), 30))
            .update(&foo_release(), at(12))
            .unwrap_err();

        assert!(matches!(err, FeedError::Parse(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "this is not xml <");
    }

    #[test]
    fn html_description_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rss.xml");
        std::fs::write(&path, EMPTY_FEED).unwrap();
        let updater = FeedUpdater::new(config(path.clone(), 30));
        let expected = updater.entry(&foo_release(), at(12)).description;

        updater.update(&foo_release(), at(12)).unwrap();

        assert_eq!(read(&path).channel.items[0].description.trim(), expected.trim());
    }
}
