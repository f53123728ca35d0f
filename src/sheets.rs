//! Worksheet backends for the ledger.
//!
//! - [`GoogleSheetsStore`] talks to a hosted Google Sheet through the Sheets v4
//!   REST values API, authenticated with an OAuth bearer token.
//! - [`InMemorySheet`] keeps the grid in memory; used for dry runs and tests.
//!
//! Both follow the same reading rules: blank cells read as `""` and row and
//! column reads stop at the last non-empty cell.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::contract::{SheetStore, StoreError};

pub const DEFAULT_SHEETS_ENDPOINT: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Spreadsheet column letters for a 1-based column index (1 → `A`, 27 → `AA`).
pub fn column_letters(col: usize) -> String {
    let mut n = col;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

fn trim_trailing_blanks(mut values: Vec<String>) -> Vec<String> {
    while values.last().is_some_and(|v| v.is_empty()) {
        values.pop();
    }
    values
}

/// Response body of `GET .../values/{range}`. `values` is omitted by the API
/// when the range is empty.
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeUpdate<'a> {
    range: &'a str,
    major_dimension: &'a str,
    values: Vec<Vec<String>>,
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Client for one worksheet of a hosted Google Sheet.
pub struct GoogleSheetsStore {
    client: Client,
    endpoint: String,
    spreadsheet_id: String,
    worksheet: String,
    access_token: String,
}

impl GoogleSheetsStore {
    pub fn new(spreadsheet_id: String, worksheet: String, access_token: String) -> Self {
        Self::with_endpoint(
            DEFAULT_SHEETS_ENDPOINT.to_string(),
            spreadsheet_id,
            worksheet,
            access_token,
        )
    }

    pub fn with_endpoint(
        endpoint: String,
        spreadsheet_id: String,
        worksheet: String,
        access_token: String,
    ) -> Self {
        debug!(
            spreadsheet_id = %spreadsheet_id,
            worksheet = %worksheet,
            token_set = !access_token.is_empty(),
            "Initialised Google Sheets store"
        );
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            spreadsheet_id,
            worksheet,
            access_token,
        }
    }

    /// A1 range qualified with the worksheet name, e.g. `'Sheet1'!A1:A`.
    fn range(&self, a1: &str) -> String {
        format!("'{}'!{}", self.worksheet.replace('\'', "''"), a1)
    }

    fn values_url(&self, range: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.endpoint)?;
        url.path_segments_mut()
            .map_err(|_| format!("endpoint {} cannot be a base URL", self.endpoint))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(range);
        Ok(url)
    }

    async fn get_range(
        &self,
        range: &str,
        major_dimension: &str,
    ) -> Result<ValueRange, StoreError> {
        let url = self.values_url(range)?;
        debug!(range, "GET worksheet range");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("majorDimension", major_dimension),
                ("valueRenderOption", "FORMATTED_VALUE"),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, range, body = %body, "Sheets API returned error");
            return Err(format!("Sheets API error {status} reading {range}: {body}").into());
        }
        Ok(response.json::<ValueRange>().await?)
    }

    async fn put_range(&self, range: &str, values: Vec<Vec<String>>) -> Result<(), StoreError> {
        let url = self.values_url(range)?;
        let body = ValueRangeUpdate {
            range,
            major_dimension: "ROWS",
            values,
        };
        debug!(range, "PUT worksheet range");
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .query(&[("valueInputOption", "RAW")])
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, range, body = %body, "Sheets API returned error");
            return Err(format!("Sheets API error {status} writing {range}: {body}").into());
        }
        Ok(())
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsStore {
    async fn row_values(&self, row: usize) -> Result<Vec<String>, StoreError> {
        let range = self.range(&format!("{row}:{row}"));
        let data = self.get_range(&range, "ROWS").await?;
        let values = data
            .values
            .into_iter()
            .next()
            .map(|row| row.iter().map(cell_text).collect())
            .unwrap_or_default();
        Ok(trim_trailing_blanks(values))
    }

    async fn col_values(&self, col: usize) -> Result<Vec<String>, StoreError> {
        let letters = column_letters(col);
        let range = self.range(&format!("{letters}:{letters}"));
        let data = self.get_range(&range, "COLUMNS").await?;
        let values = data
            .values
            .into_iter()
            .next()
            .map(|col| col.iter().map(cell_text).collect())
            .unwrap_or_default();
        Ok(trim_trailing_blanks(values))
    }

    async fn cell(&self, row: usize, col: usize) -> Result<String, StoreError> {
        let range = self.range(&format!("{}{row}", column_letters(col)));
        let data = self.get_range(&range, "ROWS").await?;
        Ok(data
            .values
            .first()
            .and_then(|row| row.first())
            .map(cell_text)
            .unwrap_or_default())
    }

    async fn update_cell(&self, row: usize, col: usize, value: &str) -> Result<(), StoreError> {
        let range = self.range(&format!("{}{row}", column_letters(col)));
        self.put_range(&range, vec![vec![value.to_string()]]).await
    }

    async fn update_row(&self, row: usize, values: Vec<String>) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let last = column_letters(values.len());
        let range = self.range(&format!("A{row}:{last}{row}"));
        self.put_range(&range, vec![values]).await
    }

    async fn all_values(&self) -> Result<Vec<Vec<String>>, StoreError> {
        let range = self.range("A:ZZ");
        let data = self.get_range(&range, "ROWS").await?;
        Ok(data
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }
}

/// Worksheet held in memory.
#[derive(Debug, Default)]
pub struct InMemorySheet {
    rows: Mutex<Vec<Vec<String>>>,
}

impl InMemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    /// Copy of the current grid.
    pub fn snapshot(&self) -> Vec<Vec<String>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<String>>> {
        // a poisoned grid is still a valid grid
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self, row: usize, col: usize, value: &str) -> Result<(), StoreError> {
        if row == 0 || col == 0 {
            return Err(format!("cell ({row}, {col}) is out of range, indices are 1-based").into());
        }
        let mut rows = self.lock();
        if rows.len() < row {
            rows.resize_with(row, Vec::new);
        }
        let cells = &mut rows[row - 1];
        if cells.len() < col {
            cells.resize(col, String::new());
        }
        cells[col - 1] = value.to_string();
        Ok(())
    }
}

#[async_trait]
impl SheetStore for InMemorySheet {
    async fn row_values(&self, row: usize) -> Result<Vec<String>, StoreError> {
        let rows = self.lock();
        let values = row
            .checked_sub(1)
            .and_then(|idx| rows.get(idx))
            .cloned()
            .unwrap_or_default();
        Ok(trim_trailing_blanks(values))
    }

    async fn col_values(&self, col: usize) -> Result<Vec<String>, StoreError> {
        let Some(idx) = col.checked_sub(1) else {
            return Ok(Vec::new());
        };
        let rows = self.lock();
        let values = rows
            .iter()
            .map(|row| row.get(idx).cloned().unwrap_or_default())
            .collect();
        Ok(trim_trailing_blanks(values))
    }

    async fn cell(&self, row: usize, col: usize) -> Result<String, StoreError> {
        let rows = self.lock();
        Ok(row
            .checked_sub(1)
            .and_then(|r| rows.get(r))
            .and_then(|cells| col.checked_sub(1).and_then(|c| cells.get(c)))
            .cloned()
            .unwrap_or_default())
    }

    async fn update_cell(&self, row: usize, col: usize, value: &str) -> Result<(), StoreError> {
        self.write(row, col, value)
    }

    async fn update_row(&self, row: usize, values: Vec<String>) -> Result<(), StoreError> {
        for (idx, value) in values.iter().enumerate() {
            self.write(row, idx + 1, value)?;
        }
        Ok(())
    }

    async fn all_values(&self) -> Result<Vec<Vec<String>>, StoreError> {
        let mut rows = self.snapshot();
        while rows.last().is_some_and(|row| row.iter().all(|c| c.is_empty())) {
            rows.pop();
        }
        Ok(rows)
    }
}
