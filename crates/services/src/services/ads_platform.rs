//! Ads platform boundary: per-creative insights and creative media lookup.
//!
//! [`AdsPlatform`] is the seam the orchestrator talks to. [`MetaAdsClient`] is the
//! production implementation backed by the Meta Graph API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const GRAPH_API_BASE: &str = "https://graph.facebook.com";
const DEFAULT_GRAPH_VERSION: &str = "v21.0";
const INSIGHT_FIELDS: &str = "ad_id,ad_name,impressions,clicks,ctr,spend,reach,actions";
const PAGE_LIMIT: &str = "500";
const MAX_PAGES: usize = 50;

/// Action types counted as conversions when summing the `actions` list
const CONVERSION_ACTION_TYPES: &[&str] = &["purchase", "lead", "complete_registration"];

#[derive(Debug, Clone, Error)]
pub enum AdsPlatformError {
    #[error("ads platform returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Inclusive reporting window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl DateWindow {
    /// `[today - days, today]`
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let since = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { since, until: today }
    }
}

/// Typed performance numbers for one creative over a window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreativeMetric {
    pub creative_id: String,
    pub creative_name: String,
    pub impressions: i64,
    pub clicks: i64,
    pub click_rate: f64,
    pub conversions: f64,
    pub spend: f64,
    pub reach: i64,
}

/// Preview references for a creative. Both absent when unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreativeMedia {
    pub thumbnail_ref: Option<String>,
    pub video_ref: Option<String>,
}

#[async_trait]
pub trait AdsPlatform: Send + Sync {
    /// Per-creative metrics for every creative that delivered in the window.
    /// An empty list is a valid answer.
    async fn fetch_insights(
        &self,
        ads_account_id: &str,
        credential: &SecretString,
        window: &DateWindow,
    ) -> Result<Vec<CreativeMetric>, AdsPlatformError>;

    async fn fetch_creative_media(
        &self,
        creative_id: &str,
        credential: &SecretString,
    ) -> Result<CreativeMedia, AdsPlatformError>;
}

#[derive(Debug, Deserialize)]
struct InsightsPage {
    #[serde(default)]
    data: Vec<RawInsightRow>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInsightRow {
    ad_id: Option<String>,
    ad_name: Option<String>,
    impressions: Option<Value>,
    clicks: Option<Value>,
    ctr: Option<Value>,
    spend: Option<Value>,
    reach: Option<Value>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    action_type: String,
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AdCreativeResponse {
    creative: Option<RawCreative>,
}

#[derive(Debug, Deserialize)]
struct RawCreative {
    thumbnail_url: Option<String>,
    image_url: Option<String>,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoResponse {
    source: Option<String>,
    permalink_url: Option<String>,
}

/// Meta Graph API client
#[derive(Debug, Clone)]
pub struct MetaAdsClient {
    http: Client,
    base_url: String,
}

impl MetaAdsClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(graph_version: Option<String>) -> Result<Self, AdsPlatformError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("ad-spy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdsPlatformError::Transport(e.to_string()))?;

        let version = graph_version.unwrap_or_else(|| DEFAULT_GRAPH_VERSION.to_string());
        Ok(Self {
            http,
            base_url: format!("{GRAPH_API_BASE}/{version}"),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, AdsPlatformError> {
        let res = request.send().await.map_err(map_reqwest_error)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(AdsPlatformError::Http {
                status: status.as_u16(),
                body,
            });
        }

        res.json::<T>()
            .await
            .map_err(|e| AdsPlatformError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AdsPlatform for MetaAdsClient {
    async fn fetch_insights(
        &self,
        ads_account_id: &str,
        credential: &SecretString,
        window: &DateWindow,
    ) -> Result<Vec<CreativeMetric>, AdsPlatformError> {
        let account = if ads_account_id.starts_with("act_") {
            ads_account_id.to_string()
        } else {
            format!("act_{ads_account_id}")
        };
        let time_range = serde_json::json!({
            "since": window.since.format("%Y-%m-%d").to_string(),
            "until": window.until.format("%Y-%m-%d").to_string(),
        })
        .to_string();

        let first = self
            .http
            .get(format!("{}/{}/insights", self.base_url, account))
            .query(&[
                ("level", "ad"),
                ("fields", INSIGHT_FIELDS),
                ("time_range", time_range.as_str()),
                ("limit", PAGE_LIMIT),
                ("access_token", credential.expose_secret()),
            ]);

        let mut page: InsightsPage = self.get_json(first).await?;
        let mut metrics = Vec::new();
        let mut pages = 1;

        loop {
            metrics.extend(page.data.into_iter().filter_map(normalize_row));

            // `next` already carries the token and cursor
            let Some(url) = next_page(page.paging, pages)? else {
                break;
            };
            page = self.get_json(self.http.get(url)).await?;
            pages += 1;
        }

        debug!(
            account = %account,
            since = %window.since,
            until = %window.until,
            creatives = metrics.len(),
            pages,
            "Fetched ad insights"
        );

        Ok(metrics)
    }

    async fn fetch_creative_media(
        &self,
        creative_id: &str,
        credential: &SecretString,
    ) -> Result<CreativeMedia, AdsPlatformError> {
        let request = self
            .http
            .get(format!("{}/{}", self.base_url, creative_id))
            .query(&[
                ("fields", "creative{thumbnail_url,image_url,video_id}"),
                ("access_token", credential.expose_secret()),
            ]);
        let response: AdCreativeResponse = self.get_json(request).await?;

        let Some(creative) = response.creative else {
            return Ok(CreativeMedia::default());
        };

        let video_ref = match creative.video_id.as_deref() {
            Some(video_id) => {
                let request = self
                    .http
                    .get(format!("{}/{}", self.base_url, video_id))
                    .query(&[
                        ("fields", "source,permalink_url"),
                        ("access_token", credential.expose_secret()),
                    ]);
                let video: VideoResponse = self.get_json(request).await?;
                video.source.or(video.permalink_url)
            }
            None => None,
        };

        Ok(CreativeMedia {
            thumbnail_ref: creative.thumbnail_url.or(creative.image_url),
            video_ref,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> AdsPlatformError {
    AdsPlatformError::Transport(e.without_url().to_string())
}

/// URL of the page after `pages_read` pages. More than `MAX_PAGES` pages is an
/// error, since a truncated set must not be ranked.
fn next_page(paging: Option<Paging>, pages_read: usize) -> Result<Option<String>, AdsPlatformError> {
    match paging.and_then(|p| p.next) {
        Some(_) if pages_read >= MAX_PAGES => Err(AdsPlatformError::Decode(format!(
            "insights exceeded {MAX_PAGES} pages"
        ))),
        next => Ok(next),
    }
}

/// Turn a raw insights row into typed metrics. Rows without an ad id are dropped.
fn normalize_row(row: RawInsightRow) -> Option<CreativeMetric> {
    let creative_id = row.ad_id.filter(|id| !id.is_empty())?;

    let conversions = row
        .actions
        .iter()
        .filter(|a| CONVERSION_ACTION_TYPES.contains(&a.action_type.as_str()))
        .map(|a| coerce_f64(a.value.as_ref()))
        .sum();

    Some(CreativeMetric {
        creative_id,
        creative_name: row.ad_name.unwrap_or_default(),
        impressions: coerce_i64(row.impressions.as_ref()),
        clicks: coerce_i64(row.clicks.as_ref()),
        click_rate: coerce_f64(row.ctr.as_ref()),
        conversions,
        spend: coerce_f64(row.spend.as_ref()),
        reach: coerce_i64(row.reach.as_ref()),
    })
}

/// The Graph API reports numbers as strings; missing or unparseable values become 0
fn coerce_f64(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn coerce_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| coerce_f64(value) as i64),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .unwrap_or_else(|_| coerce_f64(value) as i64),
        _ => 0,
    }
}
