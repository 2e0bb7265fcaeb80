use serde::Serialize;
use serde_json::Value;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::{
    entry::{ActionEntry, SgroupAction, SgroupLogs, SyncEntry},
    error::{AuditError, Result},
};

/// Which of a group's two log files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    /// `<id>.jsonl`: mutating operations
    Actions,
    /// `<id>-sync.jsonl`: flattened-relation updates
    Sync,
}

/// Per-group JSONL logs under a directory. Every operation is a no-op when
/// no directory is configured, except reading.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    log_dir: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self { log_dir }
    }

    pub fn disabled() -> Self {
        Self { log_dir: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.log_dir.is_some()
    }

    pub fn log_file(log_dir: &Path, id: &str, stream: LogStream) -> PathBuf {
        let id = id.replace('/', "_");
        match stream {
            LogStream::Actions => log_dir.join(format!("{id}.jsonl")),
            LogStream::Sync => log_dir.join(format!("{id}-sync.jsonl")),
        }
    }

    /// Append one record as a JSON line
    pub async fn append<T: Serialize>(&self, id: &str, stream: LogStream, record: &T) -> Result<()> {
        let Some(log_dir) = &self.log_dir else {
            return Ok(());
        };
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let path = Self::log_file(log_dir, id, stream);
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn log_sgroup_action(
        &self,
        who: &str,
        id: &str,
        action: SgroupAction,
        msg: Option<&str>,
        data: Value,
    ) -> Result<()> {
        let entry = ActionEntry::new(action, who, msg, data);
        self.append(id, LogStream::Actions, &entry).await
    }

    pub async fn log_flattened_modifications(
        &self,
        id: &str,
        mright: &str,
        new_count: usize,
        added: Vec<String>,
        removed: Vec<String>,
    ) -> Result<()> {
        let entry = SyncEntry {
            when: chrono::Utc::now(),
            mright: mright.to_string(),
            new_count,
            added,
            removed,
        };
        self.append(id, LogStream::Sync, &entry).await
    }

    /// Read at most the last `bytes` bytes of a log, dropping the first
    /// (possibly partial) line of a tail window
    pub async fn read(&self, id: &str, bytes: u64, stream: LogStream) -> Result<SgroupLogs> {
        let log_dir = self.log_dir.as_ref().ok_or(AuditError::NotConfigured)?;
        let path = Self::log_file(log_dir, id, stream);

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(SgroupLogs::empty()),
            Err(err) => return Err(err.into()),
        };
        let metadata = file.metadata().await?;
        let size = metadata.len();
        let last_log_date = metadata.modified().ok().map(chrono::DateTime::<chrono::Utc>::from);
        let whole_file = bytes >= size;

        let mut buffer = Vec::new();
        if whole_file {
            file.read_to_end(&mut buffer).await?;
        } else {
            // the byte preceding the window tells whether it starts on a line boundary
            let start = size - bytes - 1;
            file.seek(SeekFrom::Start(start)).await?;
            file.take(bytes + 1).read_to_end(&mut buffer).await?;
            blank_partial_line(&mut buffer);
        }
        debug!("Read {} bytes of {}", buffer.len(), path.display());

        let logs = parse_jsonl(&buffer).map_err(|reason| AuditError::ParseError {
            path: path.display().to_string(),
            reason,
        })?;
        Ok(SgroupLogs {
            last_log_date,
            whole_file,
            logs,
        })
    }
}

/// Overwrite everything up to and including the first newline with spaces
pub fn blank_partial_line(buffer: &mut [u8]) {
    for byte in buffer.iter_mut() {
        let was_newline = *byte == b'\n';
        *byte = b' ';
        if was_newline {
            break;
        }
    }
}

fn parse_jsonl(buffer: &[u8]) -> std::result::Result<Vec<Value>, String> {
    let text = std::str::from_utf8(buffer).map_err(|e| e.to_string())?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| e.to_string()))
        .collect()
}
