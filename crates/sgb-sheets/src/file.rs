use std::path::{Path, PathBuf};

use async_trait::async_trait;

use sgb_core::{
    ledger::{RowTable, LEDGER_RANGE},
    Result,
};

use crate::ValueRange;

/// Ledger table persisted as a JSON `ValueRange` on local disk.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous table intact.
#[derive(Clone, Debug)]
pub struct FileTable {
    path: PathBuf,
}

impl FileTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "activity.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl RowTable for FileTable {
    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        let txt = match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if txt.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vr: ValueRange = serde_json::from_str(&txt)?;
        Ok(vr.into_rows())
    }

    async fn write_rows(&self, rows: Vec<Vec<String>>) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let txt = serde_json::to_string_pretty(&ValueRange::from_rows(LEDGER_RANGE, rows))?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, txt).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
