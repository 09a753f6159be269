//! Dataset downloader.
//!
//! Each source is fetched into a hidden sibling file and renamed over the
//! dataset, so readers only ever see a complete old file or a complete new
//! one.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::fetch::{HttpClient, fetch_bytes};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub file_name: String,
    pub url: String,
    /// Failures are logged as warnings and do not fail the round.
    pub optional: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceEntry {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        optional: bool,
    },
}

/// Download sources, keyed by the file name they are stored under.
///
/// Stored as a JSON object on disk:
/// ```json
/// {
///   "stops.txt": "https://gtfs.irail.be/nmbs/gtfs/stops.txt",
///   "transfers.txt": { "url": "https://gtfs.irail.be/nmbs/gtfs/transfers.txt", "optional": true }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RefreshSources {
    sources: Vec<Source>,
}

impl RefreshSources {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read refresh sources {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: BTreeMap<String, SourceEntry> =
            serde_json::from_str(json).context("Invalid refresh sources")?;

        let mut sources = Vec::with_capacity(entries.len());
        for (file_name, entry) in entries {
            if file_name.is_empty()
                || file_name.starts_with('.')
                || file_name.contains(['/', '\\'])
            {
                bail!("Invalid dataset file name in refresh sources: {file_name:?}");
            }
            let (url, optional) = match entry {
                SourceEntry::Url(url) => (url, false),
                SourceEntry::Detailed { url, optional } => (url, optional),
            };
            sources.push(Source {
                file_name,
                url,
                optional,
            });
        }
        Ok(Self { sources })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Downloads `url` and atomically replaces `dest` with the body. Returns the
/// number of bytes written. An empty body leaves `dest` untouched.
pub async fn download_to<C: HttpClient>(client: &C, url: &str, dest: &Path) -> Result<u64> {
    let bytes = fetch_bytes(client, url).await?;
    if bytes.is_empty() {
        bail!("Empty response from {url}");
    }

    let dir = dest.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let tmp = staging_path(dest);
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("Failed to replace {}", dest.display()));
    }

    debug!(dest = %dest.display(), bytes = bytes.len(), "Dataset replaced");
    Ok(bytes.len() as u64)
}

/// `data/stops.txt` → `data/.stops.txt.download`
fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.download"))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub downloaded: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl RefreshReport {
    /// `true` when every required source was downloaded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Refresher<C> {
    client: C,
    data_dir: PathBuf,
    sources: RefreshSources,
}

impl<C: HttpClient> Refresher<C> {
    pub fn new(client: C, data_dir: impl Into<PathBuf>, sources: RefreshSources) -> Self {
        Self {
            client,
            data_dir: data_dir.into(),
            sources,
        }
    }

    /// Downloads every source once. Individual failures are logged and
    /// reported, never returned as errors.
    pub async fn run_once(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        let start = Instant::now();

        for source in self.sources.iter() {
            let span = tracing::info_span!("refresh_dataset", file = %source.file_name);
            let dest = self.data_dir.join(&source.file_name);
            match download_to(&self.client, &source.url, &dest).instrument(span).await {
                Ok(bytes) => {
                    info!(file = %source.file_name, bytes, "Dataset downloaded");
                    report.downloaded.push(source.file_name.clone());
                }
                Err(e) if source.optional => {
                    warn!(file = %source.file_name, error = %e, "Optional dataset not downloaded");
                    report.skipped.push(source.file_name.clone());
                }
                Err(e) => {
                    error!(file = %source.file_name, error = %e, "Dataset download failed");
                    report.failed.push(source.file_name.clone());
                }
            }
        }

        info!(
            downloaded = report.downloaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Refresh round finished"
        );
        report
    }

    /// Runs a refresh round every `period`. Stops after `rounds` rounds, or
    /// never when `rounds` is `None`.
    pub async fn watch(&self, period: Duration, rounds: Option<usize>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut round = 0usize;

        loop {
            if rounds.is_some_and(|limit| round >= limit) {
                break;
            }
            ticker.tick().await;
            round += 1;
            debug!(round, "Starting refresh round");
            let report = self.run_once().await;
            if !report.is_success() {
                warn!(
                    round,
                    failed = ?report.failed,
                    "Refresh round incomplete, retrying next tick"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 server answering each path with a fixed status and body.
    async fn serve(routes: Vec<(&'static str, u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = routes
                        .iter()
                        .find(|(p, _, _)| *p == path)
                        .map(|(_, s, b)| (*s, *b))
                        .unwrap_or((404, ""));
                    let reason = if status == 200 { "OK" } else { "Not Found" };
                    let head = format!(
                        "HTTP/1.1 {status} {reason}\r\n\
                         Content-Length: {}\r\n\
                         Connection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(body.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    const STOPS: &str = "stop_id,stop_name\nS1,Alpha\n";

    fn client() -> BasicClient {
        BasicClient::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    #[test]
    fn test_sources_accept_both_forms() {
        let sources = RefreshSources::from_json(
            r#"{
                "stops.txt": "http://x/stops.txt",
                "transfers.txt": {"url": "http://x/t.txt", "optional": true}
            }"#,
        )
        .unwrap();
        let all: Vec<&Source> = sources.iter().collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].file_name, "stops.txt");
        assert!(!all[0].optional);
        assert!(all[1].optional);
    }

    #[test]
    fn test_sources_reject_paths() {
        assert!(RefreshSources::from_json(r#"{"../stops.txt": "http://x"}"#).is_err());
        assert!(RefreshSources::from_json(r#"{".hidden": "http://x"}"#).is_err());
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        assert_eq!(
            staging_path(Path::new("data/stops.txt")),
            PathBuf::from("data/.stops.txt.download")
        );
    }

    #[tokio::test]
    async fn test_download_replaces_file() {
        let base = serve(vec![("/stops.txt", 200, STOPS)]).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("stops.txt");
        std::fs::write(&dest, "old").unwrap();

        let written = download_to(&client(), &format!("{base}/stops.txt"), &dest)
            .await
            .unwrap();
        assert_eq!(written, STOPS.len() as u64);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), STOPS);
        assert!(!staging_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_failed_download_keeps_old_file() {
        let base = serve(vec![]).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("stops.txt");
        std::fs::write(&dest, "old").unwrap();

        assert!(download_to(&client(), &format!("{base}/stops.txt"), &dest).await.is_err());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_run_once_reports_each_source() {
        let base = serve(vec![("/stops.txt", 200, "stop_id\nS1\n")]).await;
        let json = format!(
            r#"{{
                "stops.txt": "{base}/stops.txt",
                "trips.txt": "{base}/trips.txt",
                "transfers.txt": {{"url": "{base}/transfers.txt", "optional": true}}
            }}"#
        );
        let dir = TempDir::new().unwrap();
        let sources = RefreshSources::from_json(&json).unwrap();
        let refresher = Refresher::new(client(), dir.path(), sources);

        let report = refresher.run_once().await;
        assert_eq!(report.downloaded, vec!["stops.txt"]);
        assert_eq!(report.failed, vec!["trips.txt"]);
        assert_eq!(report.skipped, vec!["transfers.txt"]);
        assert!(!report.is_success());
        assert!(dir.path().join("stops.txt").exists());
    }

    #[tokio::test]
    async fn test_watch_stops_after_rounds() {
        let base = serve(vec![("/stops.txt", 200, "stop_id\nS1\n")]).await;
        let json = format!(r#"{{"stops.txt": "{base}/stops.txt"}}"#);
        let dir = TempDir::new().unwrap();
        let sources = RefreshSources::from_json(&json).unwrap();
        let refresher = Refresher::new(client(), dir.path(), sources);

        refresher.watch(Duration::from_millis(10), Some(2)).await;
        assert!(dir.path().join("stops.txt").exists());
    }
}
