//! On-disk cache for GET responses.
//!
//! # Design
//! One JSON file per URL, named by the URL's UUID v5, so lookups need no
//! index. Only 2xx GET responses whose `Cache-Control` carries a positive
//! `max-age` (and no `no-store` / `no-cache`) are stored. After each write the
//! directory is trimmed back under `max_size`, oldest files first.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CacheError;
use crate::http::HttpResponse;

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    /// Seconds since the Unix epoch.
    expires_at: u64,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    max_size: u64,
}

impl ResponseCache {
    /// Open (and create if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, max_size: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_size })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn path_for(&self, url: &str) -> PathBuf {
        let key = Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes());
        self.dir.join(format!("{key}.json"))
    }

    /// A fresh cached response for `url`, if any. Stale entries are removed.
    pub fn get(&self, url: &str) -> Result<Option<HttpResponse>, CacheError> {
        let path = self.path_for(url);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: Entry = serde_json::from_slice(&raw)?;
        if entry.url != url {
            return Ok(None);
        }
        if entry.expires_at <= now_secs() {
            debug!(%url, "cache entry expired");
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove expired cache entry");
            }
            return Ok(None);
        }
        Ok(Some(HttpResponse {
            status: entry.status,
            headers: entry.headers,
            body: entry.body,
        }))
    }

    /// Store `response` for `url` if its headers allow it. Returns whether it
    /// was written.
    pub fn put(&self, url: &str, response: &HttpResponse) -> Result<bool, CacheError> {
        if !response.is_success() {
            return Ok(false);
        }
        let Some(max_age) = response.header("cache-control").and_then(cacheable_max_age) else {
            return Ok(false);
        };
        let entry = Entry {
            url: url.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            expires_at: now_secs().saturating_add(max_age.as_secs()),
        };
        let bytes = serde_json::to_vec(&entry)?;
        if bytes.len() as u64 > self.max_size {
            return Ok(false);
        }
        let path = self.path_for(url);
        fs::write(&path, bytes)?;
        self.trim(&path)?;
        Ok(true)
    }

    /// Total bytes currently stored.
    pub fn size(&self) -> Result<u64, CacheError> {
        Ok(self.entries()?.iter().map(|(_, len, _)| len).sum())
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        for (path, _, _) in self.entries()? {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(PathBuf, u64, SystemTime)>, CacheError> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let meta = dirent.metadata()?;
            let modified = meta.modified().unwrap_or(UNIX_EPOCH);
            entries.push((path, meta.len(), modified));
        }
        Ok(entries)
    }

    /// Evict oldest entries, never `keep`, until under the size cap.
    fn trim(&self, keep: &Path) -> Result<(), CacheError> {
        let mut entries = self.entries()?;
        let mut total: u64 = entries.iter().map(|(_, len, _)| len).sum();
        if total <= self.max_size {
            return Ok(());
        }
        entries.sort_by_key(|(_, _, modified)| *modified);
        for (path, len, _) in entries {
            if total <= self.max_size {
                break;
            }
            if path == keep {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => total -= len,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to evict cache entry"),
            }
        }
        Ok(())
    }
}

/// `max-age` from a `Cache-Control` value, or `None` if the response must not
/// be stored.
fn cacheable_max_age(cache_control: &str) -> Option<Duration> {
    let mut max_age = None;
    for directive in cache_control.split(',').map(|d| d.trim().to_ascii_lowercase()) {
        match directive.as_str() {
            "no-store" | "no-cache" | "private" => return None,
            d => {
                if let Some(v) = d.strip_prefix("max-age=") {
                    max_age = v.trim_matches('"').parse::<u64>().ok();
                }
            }
        }
    }
    max_age.filter(|secs| *secs > 0).map(Duration::from_secs)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(cache_control: Option<&str>, body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: cache_control
                .map(|v| vec![("Cache-Control".to_string(), v.to_string())])
                .unwrap_or_default(),
            body: body.to_string(),
        }
    }

    #[test]
    fn stores_and_serves_fresh_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1024 * 1024).unwrap();
        let url = "http://x/feeds?page=1";

        assert!(cache.put(url, &response(Some("max-age=60"), "{}")).unwrap());
        let hit = cache.get(url).unwrap().unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.body, "{}");
        assert!(cache.get("http://x/feeds?page=2").unwrap().is_none());
    }

    #[test]
    fn respects_cache_control() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1024 * 1024).unwrap();
        assert!(!cache.put("http://x/a", &response(None, "{}")).unwrap());
        assert!(!cache.put("http://x/a", &response(Some("no-store, max-age=60"), "{}")).unwrap());
        assert!(!cache.put("http://x/a", &response(Some("max-age=0"), "{}")).unwrap());
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn skips_error_responses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1024 * 1024).unwrap();
        let mut resp = response(Some("max-age=60"), "boom");
        resp.status = 500;
        assert!(!cache.put("http://x/a", &resp).unwrap());
    }

    #[test]
    fn trims_to_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 600).unwrap();
        let body = "x".repeat(200);
        for i in 0..5 {
            cache
                .put(&format!("http://x/{i}"), &response(Some("max-age=60"), &body))
                .unwrap();
        }
        assert!(cache.size().unwrap() <= 600);
        assert!(cache.get("http://x/4").unwrap().is_some());
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path().join("nested/cache"), 4096).unwrap();
        cache.put("http://x/a", &response(Some("max-age=60"), "{}")).unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn huge_max_age_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1024 * 1024).unwrap();
        let cc = format!("max-age={}", u64::MAX);
        assert!(cache.put("http://x/forever", &response(Some(&cc), "{}")).unwrap());
        assert!(cache.get("http://x/forever").unwrap().is_some());
    }

    #[test]
    fn expired_entries_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1024 * 1024).unwrap();
        let url = "http://x/old";
        let entry = Entry {
            url: url.to_string(),
            status: 200,
            headers: Vec::new(),
            body: "{}".to_string(),
            expires_at: 1,
        };
        fs::write(cache.path_for(url), serde_json::to_vec(&entry).unwrap()).unwrap();

        assert!(cache.get(url).unwrap().is_none());
        assert!(!cache.path_for(url).exists());
    }

    #[test]
    fn parses_max_age() {
        assert_eq!(cacheable_max_age("public, max-age=30"), Some(Duration::from_secs(30)));
        assert_eq!(cacheable_max_age("max-age=\"5\""), Some(Duration::from_secs(5)));
        assert_eq!(cacheable_max_age("public"), None);
        assert_eq!(cacheable_max_age("private, max-age=30"), None);
    }
}
