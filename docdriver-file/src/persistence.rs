//! Append-only log persistence for a collection file.
//!
//! A collection file holds one JSON record per line. A record either stores the full
//! current version of a document in canonical extended JSON (`{"put": {...}}`) or marks a document as removed
//! (`{"deleted": "<_id>"}`). Replaying the file from top to bottom yields the live set of
//! documents; compaction rewrites the file with one `put` line per live document.

use std::path::{Path, PathBuf};
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::warn;

use docdriver_core::{
    document::INTERNAL_ID_FIELD,
    error::{DriverError, DriverResult},
};


/// A single line of the collection log.
///
/// Documents are written as canonical extended JSON so every value reloads with its
/// exact BSON type (`Int32` stays `Int32`, `NaN` stays a double).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogLine {
    Put(Value),
    Deleted(String),
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LogRecord {
    /// Current version of a document, including its `_id`.
    Put(Document),
    /// Removal of the document with the given `_id`.
    Deleted(String),
}

impl LogRecord {
    pub(crate) fn decode(line: &str) -> DriverResult<Self> {
        match serde_json::from_str::<LogLine>(line)? {
            LogLine::Put(value) => match Bson::try_from(value)? {
                Bson::Document(document) => Ok(LogRecord::Put(document)),
                other => Err(DriverError::Storage(format!(
                    "put record holds {:?} instead of a document",
                    other.element_type()
                ))),
            },
            LogLine::Deleted(id) => Ok(LogRecord::Deleted(id)),
        }
    }
}

fn encode(line: &LogLine) -> DriverResult<String> {
    let mut encoded = serde_json::to_string(line)?;
    encoded.push('\n');
    Ok(encoded)
}

/// Encodes a stored document as a `put` line (newline included).
pub(crate) fn encode_put(document: &Document) -> DriverResult<String> {
    encode(&LogLine::Put(Bson::Document(document.clone()).into_canonical_extjson()))
}

/// Encodes the removal of a document as a `deleted` line (newline included).
pub(crate) fn encode_deleted(internal_id: &str) -> DriverResult<String> {
    encode(&LogLine::Deleted(internal_id.to_string()))
}

/// Result of replaying a collection file.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    /// Live documents in first-insertion order.
    pub documents: Vec<Document>,
    /// Number of non-empty lines read.
    pub lines: usize,
    /// Number of lines that could not be decoded.
    pub corrupt: usize,
}

/// Reads and replays the collection file at `path`.
///
/// A missing file replays as an empty collection. Undecodable lines are skipped and
/// counted; callers decide whether the corruption rate is acceptable.
pub(crate) async fn replay(path: &Path) -> DriverResult<Replay> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Replay::default()),
        Err(err) => return Err(err.into()),
    };

    let mut replay = Replay::default();
    let mut positions = std::collections::HashMap::<String, usize>::new();
    let mut slots: Vec<Option<Document>> = Vec::new();

    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        replay.lines += 1;

        match LogRecord::decode(line) {
            Ok(LogRecord::Put(document)) => {
                let Some(id) = document.get(INTERNAL_ID_FIELD).and_then(Bson::as_str) else {
                    warn!(path = %path.display(), line = number + 1, "skipping record without an internal id");
                    replay.corrupt += 1;
                    continue;
                };

                if let Some(slot) = positions.get(id).copied() {
                    slots[slot] = Some(document);
                } else {
                    positions.insert(id.to_string(), slots.len());
                    slots.push(Some(document));
                }
            }
            Ok(LogRecord::Deleted(id)) => {
                if let Some(slot) = positions.remove(&id) {
                    slots[slot] = None;
                }
            }
            Err(err) => {
                warn!(path = %path.display(), line = number + 1, error = %err, "skipping unreadable record");
                replay.corrupt += 1;
            }
        }
    }

    replay.documents = slots.into_iter().flatten().collect();
    Ok(replay)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = path.as_os_str().to_owned();
    temp.push("~");
    PathBuf::from(temp)
}

/// Rewrites the collection file so it contains exactly `documents`.
///
/// The new contents go to a sibling `~` file that is then renamed over `path`.
pub(crate) async fn rewrite<'a>(
    path: &Path,
    documents: impl IntoIterator<Item = &'a Document>,
    sync: bool,
) -> DriverResult<()> {
    let mut contents = String::new();
    for document in documents {
        contents.push_str(&encode_put(document)?);
    }

    let temp = temp_path(path);
    let mut file = File::create(&temp).await?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;
    if sync {
        file.sync_all().await?;
    }
    drop(file);

    fs::rename(&temp, path)
        .await
        .map_err(|err| DriverError::Storage(format!("could not replace {}: {err}", path.display())))?;

    Ok(())
}

/// Opens the collection file for appending, creating it if needed.
pub(crate) async fn open_append(path: &Path) -> DriverResult<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

/// Appends already-encoded lines to the log.
pub(crate) async fn append(file: &mut File, lines: &str, sync: bool) -> DriverResult<()> {
    file.write_all(lines.as_bytes()).await?;
    file.flush().await?;
    if sync {
        file.sync_data().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn test_replay_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let replay = replay(&temp_dir.path().join("absent.db")).await.expect("replay should succeed");

        assert!(replay.documents.is_empty());
        assert_eq!(replay.lines, 0);
    }

    #[tokio::test]
    async fn test_replay_applies_updates_and_deletes_in_order() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("things.db");

        let log = [
            encode_put(&doc! { "_id": "a", "v": "first" }).unwrap(),
            encode_put(&doc! { "_id": "b", "v": "second" }).unwrap(),
            encode_put(&doc! { "_id": "a", "v": "updated" }).unwrap(),
            encode_deleted("b").unwrap(),
            "{not json\n".to_string(),
            encode_put(&doc! { "_id": "c", "v": "third" }).unwrap(),
        ]
        .concat();
        fs::write(&path, log).await.expect("write should succeed");

        let replay = replay(&path).await.expect("replay should succeed");

        assert_eq!(replay.lines, 6);
        assert_eq!(replay.corrupt, 1);
        assert_eq!(
            replay.documents,
            vec![doc! { "_id": "a", "v": "updated" }, doc! { "_id": "c", "v": "third" }]
        );
    }

    #[test]
    fn test_put_records_keep_exact_value_types() {
        let oid = bson::oid::ObjectId::new();
        let document = doc! {
            "_id": "a",
            "negative": -1_i32,
            "wide": 5_i64,
            "ratio": 1.5,
            "infinite": f64::INFINITY,
            "ref": oid,
            "at": bson::DateTime::from_millis(1_700_000_000_000),
            "nested": { "list": [1_i32, -2_i64, "x"] },
        };

        let line = encode_put(&document).unwrap();
        let decoded = LogRecord::decode(line.trim_end()).unwrap();

        assert_eq!(decoded, LogRecord::Put(document));

        let nan = encode_put(&doc! { "_id": "b", "v": f64::NAN }).unwrap();
        let LogRecord::Put(decoded) = LogRecord::decode(nan.trim_end()).unwrap() else {
            panic!("expected a put record");
        };
        assert!(matches!(decoded.get("v"), Some(Bson::Double(value)) if value.is_nan()));
    }

    #[tokio::test]
    async fn test_rewrite_compacts_the_log() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("things.db");
        let documents = vec![doc! { "_id": "a", "n": 1 }, doc! { "_id": "b", "n": 2 }];

        let mut file = open_append(&path).await.expect("open should succeed");
        append(&mut file, &encode_deleted("zzz").unwrap(), false).await.expect("append should succeed");
        drop(file);

        rewrite(&path, &documents, true).await.expect("rewrite should succeed");

        let contents = fs::read_to_string(&path).await.expect("read should succeed");
        assert_eq!(contents.lines().count(), 2);
        assert!(!temp_path(&path).exists());
    }
}
