use async_trait::async_trait;
use enrich_core::{Ack, AckHandle, ByteSink, ByteRecordSource, Record, RecordMeta};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Reads one record per line from a file, stopping at EOF. `path` doubles
/// as the partition id, since a single file source carries exactly one
/// partition's worth of ordering.
pub struct FileSource {
    path: PathBuf,
    lines: tokio::io::Lines<BufReader<tokio::fs::File>>,
    next_sequence: u64,
}

impl FileSource {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = tokio::fs::File::open(&path).await?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            next_sequence: 0,
        })
    }
}

#[async_trait]
impl ByteRecordSource for FileSource {
    async fn next(&mut self, cancel: &CancellationToken) -> anyhow::Result<Option<Record>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let Some(line) = self.lines.next_line().await? else {
            return Ok(None);
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Ok(Some(Record {
            bytes: line.into_bytes(),
            meta: RecordMeta {
                partition_id: self.path.display().to_string(),
                sequence,
            },
            ack_handle: AckHandle::new(sequence),
        }))
    }
}

/// Appends each write as one line, serialized to keep the file well formed
/// under concurrent sink workers.
pub struct FileSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl ByteSink for FileSink {
    async fn write(&self, bytes: Vec<u8>) -> anyhow::Result<Ack> {
        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(&bytes).await?;
        file.write_all(b"\n").await?;
        Ok(Ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        tokio::fs::write(&path, "one\ntwo\nthree\n").await.unwrap();

        let mut source = FileSource::open(&path).await.unwrap();
        let cancel = CancellationToken::new();
        let first = source.next(&cancel).await.unwrap().unwrap();
        let second = source.next(&cancel).await.unwrap().unwrap();
        let third = source.next(&cancel).await.unwrap().unwrap();
        assert_eq!(first.bytes, b"one");
        assert_eq!(second.meta.sequence, 1);
        assert_eq!(third.bytes, b"three");
        assert!(source.next(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sink_appends_each_write_as_a_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ndjson");
        let sink = FileSink::new(&path);
        sink.write(b"a".to_vec()).await.unwrap();
        sink.write(b"b".to_vec()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "a\nb\n");
    }
}
