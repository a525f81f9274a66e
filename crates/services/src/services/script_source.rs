//! Looks up the human-written script for a creative in a spreadsheet.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

const NAME_HEADERS: &[&str] = &["ad name", "creative name", "name"];
const SCRIPT_HEADERS: &[&str] = &["script"];
const CTA_HEADERS: &[&str] = &["cta", "call to action"];

#[derive(Debug, Clone, Error)]
pub enum ScriptSourceError {
    #[error("spreadsheet api returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Script, hook variants and call to action for one creative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub script: String,
    pub hooks: Vec<String>,
    pub cta: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptLookup {
    Found(ScriptRecord),
    NotFound,
}

#[async_trait]
pub trait ScriptSource: Send + Sync {
    /// Exact-name lookup. Transport failures are reported as `NotFound`.
    async fn lookup_by_creative_name(
        &self,
        spreadsheet_id: &str,
        credential: &SecretString,
        creative_name: &str,
    ) -> ScriptLookup;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Google Sheets v4 values client
#[derive(Debug, Clone)]
pub struct GoogleSheetsClient {
    http: Client,
    range: String,
}

impl GoogleSheetsClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(range: impl Into<String>) -> Result<Self, ScriptSourceError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("ad-spy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScriptSourceError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            range: range.into(),
        })
    }

    fn values_url(&self, spreadsheet_id: &str) -> Result<Url, ScriptSourceError> {
        let mut url =
            Url::parse(SHEETS_API_BASE).map_err(|e| ScriptSourceError::Decode(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ScriptSourceError::Decode("sheets base url cannot be a base".into()))?
            .extend([spreadsheet_id, "values", self.range.as_str()]);
        Ok(url)
    }

    async fn fetch_rows(
        &self,
        spreadsheet_id: &str,
        credential: &SecretString,
    ) -> Result<Vec<Vec<String>>, ScriptSourceError> {
        let res = self
            .http
            .get(self.values_url(spreadsheet_id)?)
            .bearer_auth(credential.expose_secret())
            .send()
            .await
            .map_err(|e| ScriptSourceError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ScriptSourceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let range = res
            .json::<ValueRange>()
            .await
            .map_err(|e| ScriptSourceError::Decode(e.to_string()))?;
        Ok(range.values)
    }
}

#[async_trait]
impl ScriptSource for GoogleSheetsClient {
    async fn lookup_by_creative_name(
        &self,
        spreadsheet_id: &str,
        credential: &SecretString,
        creative_name: &str,
    ) -> ScriptLookup {
        let rows = match self.fetch_rows(spreadsheet_id, credential).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    spreadsheet_id,
                    creative_name,
                    error = %e,
                    "Script lookup failed, treating as not found"
                );
                return ScriptLookup::NotFound;
            }
        };

        debug!(spreadsheet_id, rows = rows.len(), "Fetched script sheet");
        match find_script(&rows, creative_name) {
            Some(record) => ScriptLookup::Found(record),
            None => ScriptLookup::NotFound,
        }
    }
}

/// Column positions resolved from the header row
#[derive(Debug)]
struct Columns {
    name: usize,
    script: usize,
    cta: Option<usize>,
    hooks: Vec<usize>,
}

impl Columns {
    fn from_header(header: &[String]) -> Option<Self> {
        let normalized: Vec<String> = header.iter().map(|h| h.trim().to_lowercase()).collect();
        let position = |names: &[&str]| normalized.iter().position(|h| names.contains(&h.as_str()));

        Some(Self {
            name: position(NAME_HEADERS)?,
            script: position(SCRIPT_HEADERS)?,
            cta: position(CTA_HEADERS),
            hooks: normalized
                .iter()
                .enumerate()
                .filter(|(_, h)| h.starts_with("hook"))
                .map(|(idx, _)| idx)
                .collect(),
        })
    }
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|s| s.trim()).unwrap_or("")
}

/// Find the row whose name cell equals `creative_name` exactly. Rows with an
/// empty script count as missing.
fn find_script(rows: &[Vec<String>], creative_name: &str) -> Option<ScriptRecord> {
    let (header, body) = rows.split_first()?;
    let Some(columns) = Columns::from_header(header) else {
        warn!("Script sheet header is missing a name or script column");
        return None;
    };

    let Some(row) = body
        .iter()
        .find(|row| row.get(columns.name).map(String::as_str) == Some(creative_name))
    else {
        warn!(
            creative_name,
            "No script row matches creative name exactly (renamed ad?)"
        );
        return None;
    };

    let script = cell(row, columns.script);
    if script.is_empty() {
        warn!(creative_name, "Script row found but script cell is empty");
        return None;
    }

    let hooks = columns
        .hooks
        .iter()
        .flat_map(|&idx| cell(row, idx).lines())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect();

    Some(ScriptRecord {
        script: script.to_string(),
        hooks,
        cta: columns
            .cta
            .map(|idx| cell(row, idx).to_string())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_finds_row_by_exact_name() {
        let rows = sheet(&[
            &["Ad Name", "Script", "Hook 1", "Hook 2", "CTA"],
            &["Summer Sale", "Old script", "Hook A", "Hook B", "Shop now"],
            &["Winter Sale", "Cold script", "Brr", "", "Buy"],
        ]);

        let record = find_script(&rows, "Winter Sale").unwrap();
        assert_eq!(record.script, "Cold script");
        assert_eq!(record.hooks, vec!["Brr".to_string()]);
        assert_eq!(record.cta, "Buy");
    }

    #[test]
    fn test_name_match_is_exact() {
        let rows = sheet(&[
            &["Ad Name", "Script", "CTA"],
            &["Summer Sale", "Old script", "Shop now"],
        ]);
        assert!(find_script(&rows, "summer sale").is_none());
        assert!(find_script(&rows, "Summer Sale v2").is_none());
    }

    #[test]
    fn test_hooks_split_on_newlines_in_one_cell() {
        let rows = sheet(&[
            &["creative name", "SCRIPT", "Hooks", "Call to Action"],
            &["UGC 1", "Body", "First hook\n Second hook \n\nThird", "Try it"],
        ]);
        let record = find_script(&rows, "UGC 1").unwrap();
        assert_eq!(record.hooks, vec!["First hook", "Second hook", "Third"]);
        assert_eq!(record.cta, "Try it");
    }

    #[test]
    fn test_short_rows_and_missing_columns() {
        let rows = sheet(&[&["Name", "Script", "CTA"], &["Short", "Only script"]]);
        let record = find_script(&rows, "Short").unwrap();
        assert_eq!(record.cta, "");
        assert!(record.hooks.is_empty());

        let no_script_column = sheet(&[&["Name", "Body"], &["Short", "text"]]);
        assert!(find_script(&no_script_column, "Short").is_none());
        assert!(find_script(&[], "Short").is_none());
    }

    #[test]
    fn test_empty_script_counts_as_missing() {
        let rows = sheet(&[&["Ad Name", "Script"], &["Blank", "   "]]);
        assert!(find_script(&rows, "Blank").is_none());
    }

    #[test]
    fn test_values_url_escapes_range() {
        let client = GoogleSheetsClient::new("Scripts!A:Z").unwrap();
        let url = client.values_url("sheet-123").unwrap();
        assert!(url.as_str().starts_with(
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/Scripts!A:Z"
        ));
    }
}
