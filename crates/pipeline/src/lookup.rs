//! Show-title lookup for TV rules that do not name their show.
//!
//! AniList is asked first, Jikan second. Hits are cached in a JSON file so a
//! title is only fetched once across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use crate::config::PipelineConfig;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

const ANILIST_QUERY: &str =
    "query ($search: String) { Media(search: $search, type: ANIME) { title { english romaji } startDate { year } } }";

/// A resolved show title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowTitle {
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
}

impl fmt::Display for ShowTitle {
    /// Library folder form: `Title (Year)` or just `Title`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year {
            Some(year) => write!(f, "{} ({})", self.title, year),
            None => f.write_str(&self.title),
        }
    }
}

/// Resolves a filename-derived guess into a canonical show title.
/// `None` means "keep the guess"; lookup problems are logged, never returned.
pub trait ShowLookup {
    fn lookup(&self, query: &str) -> impl Future<Output = Option<ShowTitle>>;
}

/// A disabled lookup keeps every guess
impl<L: ShowLookup> ShowLookup for Option<L> {
    async fn lookup(&self, query: &str) -> Option<ShowTitle> {
        match self {
            Some(inner) => inner.lookup(query).await,
            None => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AniListResponse {
    data: Option<AniListData>,
}

#[derive(Debug, Deserialize)]
struct AniListData {
    #[serde(rename = "Media")]
    media: Option<AniListMedia>,
}

#[derive(Debug, Deserialize)]
struct AniListMedia {
    title: AniListTitle,
    #[serde(rename = "startDate")]
    start_date: Option<AniListDate>,
}

#[derive(Debug, Deserialize)]
struct AniListTitle {
    english: Option<String>,
    romaji: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AniListDate {
    year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct JikanResponse {
    #[serde(default)]
    data: Vec<JikanAnime>,
}

#[derive(Debug, Deserialize)]
struct JikanAnime {
    title_english: Option<String>,
    title: Option<String>,
    aired: Option<JikanAired>,
}

#[derive(Debug, Deserialize)]
struct JikanAired {
    from: Option<String>,
}

fn non_empty(title: Option<String>) -> Option<String> {
    title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn title_from_anilist(response: AniListResponse) -> Option<ShowTitle> {
    let media = response.data?.media?;
    let title = non_empty(media.title.english).or_else(|| non_empty(media.title.romaji))?;
    Some(ShowTitle { title, year: media.start_date.and_then(|d| d.year) })
}

fn title_from_jikan(response: JikanResponse) -> Option<ShowTitle> {
    let best = response.data.into_iter().next()?;
    let title = non_empty(best.title_english).or_else(|| non_empty(best.title))?;
    let year = best
        .aired
        .and_then(|a| a.from)
        .and_then(|from| from.get(..4).and_then(|y| y.parse().ok()));
    Some(ShowTitle { title, year })
}

fn cache_key(query: &str) -> String {
    query.trim().to_lowercase()
}

/// AniList, then Jikan, with a JSON cache of hits
pub struct AnimeTitleLookup {
    client: Client,
    anilist_url: String,
    jikan_url: String,
    cache_path: PathBuf,
    cache: Mutex<BTreeMap<String, ShowTitle>>,
}

impl AnimeTitleLookup {
    pub fn new(anilist_url: String, jikan_url: String, cache_path: PathBuf) -> Result<Self> {
        let client = Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
        let cache = load_cache(&cache_path);
        Ok(Self {
            client,
            anilist_url,
            jikan_url,
            cache_path,
            cache: Mutex::new(cache),
        })
    }

    /// `None` when lookups are disabled in the config
    pub fn from_config(cfg: &PipelineConfig) -> Result<Option<Self>> {
        if !cfg.lookup.enabled {
            return Ok(None);
        }
        let lookup = Self::new(
            cfg.lookup.anilist_url.clone(),
            cfg.lookup.jikan_url.clone(),
            cfg.lookup_cache_path(),
        )?;
        Ok(Some(lookup))
    }

    fn cached(&self, key: &str) -> Option<ShowTitle> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).get(key).cloned()
    }

    fn remember(&self, key: String, title: ShowTitle) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.insert(key, title);
        if let Err(e) = save_cache(&self.cache_path, &cache) {
            warn!("Failed to save show lookup cache {}: {:#}", self.cache_path.display(), e);
        }
    }

    async fn query_anilist(&self, query: &str) -> Result<Option<ShowTitle>> {
        let body = json!({ "query": ANILIST_QUERY, "variables": { "search": query } });
        let response = self
            .client
            .post(&self.anilist_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<AniListResponse>()
            .await?;
        Ok(title_from_anilist(response))
    }

    async fn query_jikan(&self, query: &str) -> Result<Option<ShowTitle>> {
        let response = self
            .client
            .get(&self.jikan_url)
            .query(&[
                ("q", query),
                ("limit", "5"),
                ("sfw", "true"),
                ("order_by", "members"),
                ("sort", "desc"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<JikanResponse>()
            .await?;
        Ok(title_from_jikan(response))
    }
}

impl ShowLookup for AnimeTitleLookup {
    async fn lookup(&self, query: &str) -> Option<ShowTitle> {
        let key = cache_key(query);
        if key.is_empty() {
            return None;
        }
        if let Some(hit) = self.cached(&key) {
            debug!("Show lookup cache hit for '{}': {}", query, hit);
            return Some(hit);
        }

        let found = match self.query_anilist(query).await {
            Ok(Some(title)) => Some(title),
            Ok(None) => None,
            Err(e) => {
                warn!("AniList lookup failed for '{}': {}", query, e.without_url_chain());
                None
            }
        };
        let found = match found {
            Some(title) => Some(title),
            None => match self.query_jikan(query).await {
                Ok(title) => title,
                Err(e) => {
                    warn!("Jikan lookup failed for '{}': {}", query, e.without_url_chain());
                    None
                }
            },
        };

        match found {
            Some(title) => {
                info!("Resolved show '{}' as {}", query, title);
                self.remember(key, title.clone());
                Some(title)
            }
            None => {
                debug!("No online match for show '{}'", query);
                None
            }
        }
    }
}

/// Error text without request URLs
trait WithoutUrlChain {
    fn without_url_chain(self) -> String;
}

impl WithoutUrlChain for anyhow::Error {
    fn without_url_chain(self) -> String {
        match self.downcast::<reqwest::Error>() {
            Ok(e) => e.without_url().to_string(),
            Err(e) => format!("{:#}", e),
        }
    }
}

fn load_cache(path: &Path) -> BTreeMap<String, ShowTitle> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Ignoring corrupt show lookup cache {}: {}", path.display(), e);
            BTreeMap::new()
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => {
            warn!("Could not read show lookup cache {}: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

fn save_cache(path: &Path, cache: &BTreeMap<String, ShowTitle>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(cache)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Answers every query with the same title and records the queries
    #[derive(Debug, Default)]
    pub(crate) struct FixedLookup {
        pub(crate) answer: Option<ShowTitle>,
        pub(crate) queries: RefCell<Vec<String>>,
    }

    impl ShowLookup for FixedLookup {
        async fn lookup(&self, query: &str) -> Option<ShowTitle> {
            self.queries.borrow_mut().push(query.to_string());
            self.answer.clone()
        }
    }

    // Loopback port 1 refuses connections immediately
    fn offline_lookup(cache_path: PathBuf) -> AnimeTitleLookup {
        AnimeTitleLookup::new(
            "http://127.0.0.1:1/graphql".to_string(),
            "http://127.0.0.1:1/v4/anime".to_string(),
            cache_path,
        )
        .unwrap()
    }

    #[test]
    fn test_display_with_and_without_year() {
        let with = ShowTitle { title: "Frieren".to_string(), year: Some(2023) };
        let without = ShowTitle { title: "Frieren".to_string(), year: None };
        assert_eq!(with.to_string(), "Frieren (2023)");
        assert_eq!(without.to_string(), "Frieren");
    }

    #[test]
    fn test_anilist_prefers_english_title() {
        let response: AniListResponse = serde_json::from_str(
            r#"{"data":{"Media":{"title":{"english":"Frieren: Beyond Journey's End","romaji":"Sousou no Frieren"},"startDate":{"year":2023}}}}"#,
        )
        .unwrap();
        assert_eq!(
            title_from_anilist(response),
            Some(ShowTitle { title: "Frieren: Beyond Journey's End".to_string(), year: Some(2023) })
        );

        let romaji_only: AniListResponse = serde_json::from_str(
            r#"{"data":{"Media":{"title":{"english":null,"romaji":"Sousou no Frieren"},"startDate":{"year":null}}}}"#,
        )
        .unwrap();
        assert_eq!(
            title_from_anilist(romaji_only),
            Some(ShowTitle { title: "Sousou no Frieren".to_string(), year: None })
        );

        let missing: AniListResponse = serde_json::from_str(r#"{"data":{"Media":null}}"#).unwrap();
        assert_eq!(title_from_anilist(missing), None);
    }

    #[test]
    fn test_jikan_takes_first_result_and_aired_year() {
        let response: JikanResponse = serde_json::from_str(
            r#"{"data":[
                {"title_english":"","title":"Sousou no Frieren","aired":{"from":"2023-09-29T00:00:00+00:00"}},
                {"title_english":"Other","title":"Other","aired":{"from":null}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            title_from_jikan(response),
            Some(ShowTitle { title: "Sousou no Frieren".to_string(), year: Some(2023) })
        );

        let empty: JikanResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert_eq!(title_from_jikan(empty), None);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");
        fs::write(&cache_path, r#"{"frieren":{"title":"Frieren","year":2023}}"#).unwrap();

        let lookup = offline_lookup(cache_path);
        let hit = lookup.lookup("  Frieren ").await;
        assert_eq!(hit, Some(ShowTitle { title: "Frieren".to_string(), year: Some(2023) }));
    }

    #[tokio::test]
    async fn test_unreachable_services_fall_back_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");
        let lookup = offline_lookup(cache_path.clone());

        assert_eq!(lookup.lookup("Unknown Show").await, None);
        assert_eq!(lookup.lookup("").await, None);
        assert!(!cache_path.exists());
    }

    #[test]
    fn test_remember_persists_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("logs/cache.json");
        let lookup = offline_lookup(cache_path.clone());
        lookup.remember("dandadan".to_string(), ShowTitle { title: "Dan Da Dan".to_string(), year: Some(2024) });

        let reloaded = load_cache(&cache_path);
        assert_eq!(reloaded["dandadan"].to_string(), "Dan Da Dan (2024)");
    }

    #[test]
    fn test_corrupt_cache_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");
        fs::write(&cache_path, b"not json").unwrap();
        assert!(load_cache(&cache_path).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_lookup_keeps_guess() {
        let disabled: Option<FixedLookup> = None;
        assert_eq!(disabled.lookup("Frieren").await, None);

        let enabled = Some(FixedLookup {
            answer: Some(ShowTitle { title: "Frieren".to_string(), year: None }),
            ..FixedLookup::default()
        });
        assert!(enabled.lookup("Frieren").await.is_some());
    }
}
