use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use sgb_core::{
    errors::Error,
    ledger::{RowTable, LEDGER_RANGE},
    Result,
};

use crate::{auth::TokenSource, ValueRange};

pub const DEFAULT_SHEETS_BASE: &str = "https://sheets.googleapis.com/v4";

/// Ledger table stored in a Google spreadsheet via the Sheets values API.
///
/// Each request asks `auth` for a bearer token, so a refreshing source keeps
/// the table usable past the first token's expiry.
#[derive(Clone)]
pub struct SheetsTable {
    spreadsheet_id: String,
    auth: Arc<dyn TokenSource>,
    range: String,
    base_url: String,
    http: reqwest::Client,
}

impl SheetsTable {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        auth: Arc<dyn TokenSource>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("sheets client build error: {e}")))?;
        Ok(Self {
            spreadsheet_id: spreadsheet_id.into(),
            auth,
            range: LEDGER_RANGE.to_string(),
            base_url: DEFAULT_SHEETS_BASE.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn values_url(&self) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.base_url,
            self.spreadsheet_id,
            urlencoding::encode(&self.range)
        )
    }

    async fn check(resp: reqwest::Response, op: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(Error::External(format!(
            "sheets {op} failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )))
    }
}

#[async_trait]
impl RowTable for SheetsTable {
    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        let resp = self
            .http
            .get(self.values_url())
            .bearer_auth(self.auth.access_token().await?)
            .send()
            .await
            .map_err(|e| Error::External(format!("sheets request error: {e}")))?;
        let resp = Self::check(resp, "values.get").await?;

        let vr: ValueRange = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("sheets json error: {e}")))?;
        Ok(vr.into_rows())
    }

    async fn write_rows(&self, rows: Vec<Vec<String>>) -> Result<()> {
        let count = rows.len();
        let body = ValueRange::from_rows(&self.range, rows);
        let resp = self
            .http
            .put(self.values_url())
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(self.auth.access_token().await?)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::External(format!("sheets request error: {e}")))?;
        Self::check(resp, "values.update").await?;

        tracing::debug!(rows = count, range = %self.range, "sheet updated");
        Ok(())
    }
}
