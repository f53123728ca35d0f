//! Ledger client: the record of which posts were collected and which were published.
//!
//! The ledger is one worksheet. Row 1 is a header naming the columns; every
//! following row is one post, keyed by its `id`. Rows are only ever appended,
//! and the only mutation is flipping `image_uploaded` once.
//!
//! The spreadsheet has no boolean type, so the flag is stored as the text
//! [`UPLOADED_SENTINEL`]. That spelling stays inside this module; callers see
//! [`PostRecord::image_uploaded`] as a `bool`.
//!
//! No locking: append and lookup are separate remote calls, so the client
//! must have a single writer.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::contract::{PostRecord, SheetStore, StoreError};

/// Text stored in the flag column once a post has been published.
pub const UPLOADED_SENTINEL: &str = "TRUE";

pub const ID_COLUMN: &str = "id";
pub const FLAG_COLUMN: &str = "image_uploaded";

/// Column order written when the ledger is initialised.
pub const HEADER: [&str; 6] = ["title", "selftext", "author", "url", ID_COLUMN, FLAG_COLUMN];

const HEADER_ROW: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no ledger row with id {0:?}")]
    RowNotFound(String),

    #[error("ledger has no column named {0:?}")]
    ColumnNotFound(String),

    #[error("ledger store error: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// True for the recoverable lookup failures (missing row or column).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::RowNotFound(_) | LedgerError::ColumnNotFound(_)
        )
    }
}

/// Result of [`LedgerClient::mark_uploaded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The flag was flipped by this call.
    Marked,
    /// The flag already read as uploaded; nothing was written.
    AlreadyMarked,
}

pub fn encode_flag(uploaded: bool) -> &'static str {
    if uploaded {
        UPLOADED_SENTINEL
    } else {
        ""
    }
}

pub fn decode_flag(cell: &str) -> bool {
    cell == UPLOADED_SENTINEL
}

/// Client over one ledger worksheet. Owns its store; construct one per run
/// and pass it to every pipeline stage.
pub struct LedgerClient<S> {
    store: S,
}

impl<S: SheetStore> LedgerClient<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Writes [`HEADER`] into row 1 if the worksheet has no header yet.
    /// Returns whether anything was written.
    pub async fn ensure_header(&self) -> Result<bool, LedgerError> {
        let header = self.store.row_values(HEADER_ROW).await?;
        if header.iter().any(|cell| !cell.is_empty()) {
            return Ok(false);
        }
        let values = HEADER.iter().map(|name| name.to_string()).collect();
        self.store.update_row(HEADER_ROW, values).await?;
        info!("[LEDGER] Initialised empty worksheet with header row");
        Ok(true)
    }

    /// 1-based position of `name` in the header row.
    pub async fn column_index(&self, name: &str) -> Result<usize, LedgerError> {
        let header = self.store.row_values(HEADER_ROW).await?;
        header
            .iter()
            .position(|cell| cell == name)
            .map(|idx| idx + 1)
            .ok_or_else(|| LedgerError::ColumnNotFound(name.to_string()))
    }

    /// 1-based position of the first data row whose `id` equals `id` exactly.
    /// The first row under the header is position 1.
    ///
    /// A worksheet with no data rows, or no header at all, yields `RowNotFound`.
    pub async fn find_row(&self, id: &str) -> Result<usize, LedgerError> {
        let id_col = match self.column_index(ID_COLUMN).await {
            Ok(col) => col,
            Err(LedgerError::ColumnNotFound(_)) if self.is_blank().await? => {
                return Err(LedgerError::RowNotFound(id.to_string()));
            }
            Err(e) => return Err(e),
        };
        let ids = self.store.col_values(id_col).await?;
        ids.iter()
            .skip(HEADER_ROW)
            .position(|cell| cell == id)
            .map(|idx| idx + 1)
            .ok_or_else(|| LedgerError::RowNotFound(id.to_string()))
    }

    /// Writes `values` into the first row after the last populated `id` cell
    /// and returns the new row's data position (as [`find_row`] counts it).
    ///
    /// Does not check for duplicates: callers look the id up with
    /// [`find_row`] first and only append on `RowNotFound`.
    ///
    /// [`find_row`]: LedgerClient::find_row
    pub async fn append_row(&self, values: Vec<String>) -> Result<usize, LedgerError> {
        let id_col = self.column_index(ID_COLUMN).await?;
        let populated = self.store.col_values(id_col).await?.len().max(HEADER_ROW);
        let sheet_row = populated + 1;
        self.store.update_row(sheet_row, values).await?;
        info!(row = sheet_row, "[LEDGER] Row appended");
        Ok(sheet_row - HEADER_ROW)
    }

    /// Appends `record` with its fields placed under their header columns.
    /// Initialises the header first on a blank worksheet.
    pub async fn append_post(&self, record: &PostRecord) -> Result<usize, LedgerError> {
        self.ensure_header().await?;
        let header = self.store.row_values(HEADER_ROW).await?;
        for required in [ID_COLUMN, FLAG_COLUMN] {
            if !header.iter().any(|cell| cell == required) {
                return Err(LedgerError::ColumnNotFound(required.to_string()));
            }
        }
        let values = header
            .iter()
            .map(|column| match column.as_str() {
                "id" => record.id.clone(),
                "title" => record.title.clone(),
                "selftext" => record.selftext.clone(),
                "author" => record.author.clone(),
                "url" => record.url.clone(),
                FLAG_COLUMN => encode_flag(record.image_uploaded).to_string(),
                _ => String::new(),
            })
            .collect();
        self.append_row(values).await
    }

    /// Sets the `image_uploaded` flag of the row keyed by `id`.
    ///
    /// A row that is already flagged is left untouched and reported as
    /// [`MarkOutcome::AlreadyMarked`] with a warning, not an error.
    pub async fn mark_uploaded(&self, id: &str) -> Result<MarkOutcome, LedgerError> {
        let flag_col = self.column_index(FLAG_COLUMN).await?;
        let sheet_row = self.find_row(id).await? + HEADER_ROW;
        let current = self.store.cell(sheet_row, flag_col).await?;
        if decode_flag(&current) {
            warn!(
                id,
                row = sheet_row,
                col = flag_col,
                "[LEDGER] Row already marked as uploaded"
            );
            return Ok(MarkOutcome::AlreadyMarked);
        }
        self.store
            .update_cell(sheet_row, flag_col, encode_flag(true))
            .await?;
        info!(id, row = sheet_row, "[LEDGER] Marked row as uploaded");
        Ok(MarkOutcome::Marked)
    }

    /// Every row whose flag does not read as uploaded, in sheet order.
    pub async fn list_unprocessed(&self) -> Result<Vec<PostRecord>, LedgerError> {
        let rows = self.store.all_values().await?;
        let Some((header, data)) = rows.split_first() else {
            return Ok(Vec::new());
        };
        let columns: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        if !columns.contains_key(FLAG_COLUMN) {
            return Err(LedgerError::ColumnNotFound(FLAG_COLUMN.to_string()));
        }
        let field = |row: &[String], name: &str| -> String {
            columns
                .get(name)
                .and_then(|idx| row.get(*idx))
                .cloned()
                .unwrap_or_default()
        };

        let pending: Vec<PostRecord> = data
            .iter()
            .filter(|row| row.iter().any(|cell| !cell.is_empty()))
            .map(|row| PostRecord {
                id: field(row, ID_COLUMN),
                title: field(row, "title"),
                selftext: field(row, "selftext"),
                author: field(row, "author"),
                url: field(row, "url"),
                image_uploaded: decode_flag(&field(row, FLAG_COLUMN)),
            })
            .filter(|record| !record.image_uploaded)
            .collect();
        debug!(
            total = data.len(),
            pending = pending.len(),
            "[LEDGER] Listed unprocessed rows"
        );
        Ok(pending)
    }

    async fn is_blank(&self) -> Result<bool, LedgerError> {
        let header = self.store.row_values(HEADER_ROW).await?;
        Ok(header.iter().all(|cell| cell.is_empty()))
    }
}
