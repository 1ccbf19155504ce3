//! Client for the movie manager's HTTP API.
//!
//! The API is a flat GET+JSON surface under `/api/<key>/<action>`; the
//! pre-shared key is passed through as a path segment. Only the search and
//! wanted-list-add actions are used here.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::debug;
use url::Url;

pub struct MediaClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

/// One movie in a search result.
#[derive(Debug, Clone, Deserialize)]
pub struct Movie {
    #[serde(default)]
    pub original_title: String,
    pub in_wanted: Option<ListEntry>,
    pub in_library: Option<ListEntry>,
}

/// Membership marker in the wanted or library list.
#[derive(Debug, Clone, Deserialize)]
pub struct ListEntry {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    movies: Vec<Movie>,
}

#[derive(Debug, Deserialize)]
pub struct AddResponse {
    #[serde(default)]
    pub success: bool,
    pub movie: Option<AddedMovie>,
}

#[derive(Debug, Deserialize)]
pub struct AddedMovie {
    #[serde(default)]
    pub title: String,
    pub info: Option<MovieInfo>,
}

#[derive(Debug, Deserialize)]
pub struct MovieInfo {
    pub tagline: Option<String>,
}

impl Movie {
    /// Title annotated with its wanted/library status, as shown by `!search`.
    pub fn display_line(&self) -> String {
        if let Some(wanted) = &self.in_wanted {
            format!("{} (wanted: {})", self.original_title, wanted.status)
        } else if let Some(library) = &self.in_library {
            format!("{} (library: {})", self.original_title, library.status)
        } else {
            self.original_title.clone()
        }
    }
}

impl MediaClient {
    pub fn new(http: reqwest::Client, base_url: Url, api_key: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Movie>> {
        let url = self.endpoint("search", "q", query)?;
        let response: SearchResponse = self.get_json(url).await?;
        Ok(response.movies)
    }

    pub async fn add(&self, identifier: &str) -> Result<AddResponse> {
        let url = self.endpoint("movie.add", "identifier", identifier)?;
        self.get_json(url).await
    }

    fn endpoint(&self, action: &str, param: &str, value: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("media API URL cannot be a base"))?
            .clear()
            .extend(["api", &self.api_key, action]);
        url.query_pairs_mut().clear().append_pair(param, value);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("🎬 GET {url}");
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
