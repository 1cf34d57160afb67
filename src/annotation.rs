//! Durable, keyed storage of operator annotations.
//!
//! One CSV file, one row per image:
//!
//! ```text
//! image,biological,species
//! p1.tif,algae,diatom
//! p7.tif,,
//! ```
//!
//! Every save rewrites the whole file into a temporary sibling and renames it
//! over the original, so a crash mid-save leaves either the old file or the
//! new one, never a torn mix. Columns are matched by header name on load;
//! stale rows for images that no longer exist are carried along untouched.

use crate::error::CyzError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Header of the key column.
pub const KEY_COLUMN: &str = "image";

/// Field values for one image, aligned with the store's field names.
///
/// The empty record (all fields blank) is what [`AnnotationStore::load`]
/// returns for an image that was never annotated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    values: Vec<String>,
}

impl AnnotationRecord {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// A record with `width` blank fields.
    pub fn empty(width: usize) -> Self {
        Self {
            values: vec![String::new(); width],
        }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Value at `index`, or `""` past the end.
    pub fn get(&self, index: usize) -> &str {
        self.values.get(index).map(String::as_str).unwrap_or("")
    }

    /// True when every field is blank.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(|v| v.is_empty())
    }
}

/// CSV-backed map from image file name to [`AnnotationRecord`].
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    path: PathBuf,
    fields: Vec<String>,
}

impl AnnotationStore {
    /// A store at `path` with the given field columns.
    ///
    /// Nothing is touched on disk until the first save.
    pub fn new(path: impl Into<PathBuf>, fields: Vec<String>) -> Self {
        Self {
            path: path.into(),
            fields,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Position of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// The record for `image`, or the empty record if never saved.
    ///
    /// A missing backing file means "no records yet".
    pub fn load(&self, image: &str) -> Result<AnnotationRecord, CyzError> {
        let mut all = self.load_all()?;
        Ok(all
            .remove(image)
            .unwrap_or_else(|| AnnotationRecord::empty(self.fields.len())))
    }

    /// Every stored record, including keys for images no longer present.
    pub fn load_all(&self) -> Result<BTreeMap<String, AnnotationRecord>, CyzError> {
        Ok(self
            .read_table()?
            .rows
            .into_iter()
            .map(|(key, row)| (key, row.record))
            .collect())
    }

    /// Upsert the full record for `image`.
    ///
    /// Fewer values than fields are padded with blanks; more is an error.
    /// Columns in the file that are not configured fields are written back
    /// untouched. On failure nothing changes on disk and the same call can be
    /// retried.
    pub fn save(&self, image: &str, record: &AnnotationRecord) -> Result<(), CyzError> {
        if image.is_empty() {
            return Err(CyzError::InvalidAnnotation("image key is empty".into()));
        }
        if record.values.len() > self.fields.len() {
            return Err(CyzError::InvalidAnnotation(format!(
                "{} values given for {} fields ({})",
                record.values.len(),
                self.fields.len(),
                self.fields.join(", ")
            )));
        }

        let mut table = self.read_table()?;
        let mut values = record.values.clone();
        values.resize(self.fields.len(), String::new());

        let width = table.extra.len();
        let row = table.rows.entry(image.to_string()).or_insert_with(|| StoredRow {
            record: AnnotationRecord::default(),
            extra: vec![String::new(); width],
        });
        row.record = AnnotationRecord { values };

        self.write_table(&table)?;
        info!("Saved annotation for {}", image);
        Ok(())
    }

    /// Parse the backing file. A missing file is an empty table.
    fn read_table(&self) -> Result<StoredTable, CyzError> {
        let mut table = StoredTable::default();
        if !self.path.exists() {
            return Ok(table);
        }

        let read_err = |detail: String| CyzError::StorageReadFailure {
            path: self.path.clone(),
            detail,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| read_err(e.to_string()))?;

        let headers = reader.headers().map_err(|e| read_err(e.to_string()))?.clone();
        if headers.is_empty() {
            return Ok(table);
        }
        let key_col = headers
            .iter()
            .position(|h| h == KEY_COLUMN)
            .ok_or_else(|| read_err(format!("missing '{KEY_COLUMN}' column")))?;
        let columns: Vec<Option<usize>> = self
            .fields
            .iter()
            .map(|f| headers.iter().position(|h| h == f))
            .collect();

        // Columns from another field set; kept so a save never drops them.
        let extra_cols: Vec<usize> = (0..headers.len())
            .filter(|&i| i != key_col && !columns.contains(&Some(i)))
            .collect();
        table.extra = extra_cols.iter().map(|&i| headers[i].to_string()).collect();

        for row in reader.records() {
            let row = row.map_err(|e| read_err(e.to_string()))?;
            let Some(key) = row.get(key_col).filter(|k| !k.is_empty()) else {
                continue;
            };
            let cell = |c: usize| row.get(c).unwrap_or("").to_string();
            let values = columns.iter().map(|col| col.map(cell).unwrap_or_default());
            // Later rows win if a hand-edited file repeats a key.
            table.rows.insert(
                key.to_string(),
                StoredRow {
                    record: AnnotationRecord::new(values),
                    extra: extra_cols.iter().map(|&c| cell(c)).collect(),
                },
            );
        }

        debug!("Loaded {} annotations from {}", table.rows.len(), self.path.display());
        Ok(table)
    }

    /// Rewrite the backing file atomically.
    fn write_table(&self, table: &StoredTable) -> Result<(), CyzError> {
        let write_err = |source: std::io::Error| CyzError::StorageWriteFailure {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            let header = std::iter::once(KEY_COLUMN)
                .chain(self.fields.iter().map(String::as_str))
                .chain(table.extra.iter().map(String::as_str));
            writer.write_record(header).map_err(|e| write_err(e.into()))?;
            for (key, row) in &table.rows {
                let line = std::iter::once(key.as_str())
                    .chain(row.record.values.iter().map(String::as_str))
                    .chain(row.extra.iter().map(String::as_str));
                writer.write_record(line).map_err(|e| write_err(e.into()))?;
            }
            writer.flush().map_err(write_err)?;
        }
        tmp.as_file_mut().sync_all().map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

/// The whole backing file: configured fields plus any other columns found.
#[derive(Debug, Default)]
struct StoredTable {
    extra: Vec<String>,
    rows: BTreeMap<String, StoredRow>,
}

#[derive(Debug)]
struct StoredRow {
    record: AnnotationRecord,
    extra: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> AnnotationStore {
        AnnotationStore::new(
            dir.path().join("annotations").join("annotations.csv"),
            vec!["biological".into(), "species".into()],
        )
    }

    #[test]
    fn load_without_file_is_empty_record() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let r = s.load("p1.tif").unwrap();
        assert!(r.is_empty());
        assert_eq!(r.values().len(), 2);
        assert!(s.load_all().unwrap().is_empty());
    }

    #[test]
    fn last_save_wins() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.save("p1.tif", &AnnotationRecord::new(["algae", "diatom"])).unwrap();
        s.save("p1.tif", &AnnotationRecord::new(["algae", "dinoflagellate"])).unwrap();
        s.save("p2.tif", &AnnotationRecord::new(["detritus", ""])).unwrap();

        assert_eq!(
            s.load("p1.tif").unwrap(),
            AnnotationRecord::new(["algae", "dinoflagellate"])
        );
        assert_eq!(s.load("p2.tif").unwrap().get(0), "detritus");
        assert!(s.load("p3.tif").unwrap().is_empty());
    }

    #[test]
    fn save_replaces_whole_record() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.save("p1.tif", &AnnotationRecord::new(["algae", "diatom"])).unwrap();
        s.save("p1.tif", &AnnotationRecord::new(["bacteria"])).unwrap();
        assert_eq!(s.load("p1.tif").unwrap(), AnnotationRecord::new(["bacteria", ""]));
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        store(&dir)
            .save("p1.tif", &AnnotationRecord::new(["algae", "diatom, centric"]))
            .unwrap();
        let reopened = store(&dir);
        assert_eq!(reopened.load("p1.tif").unwrap().get(1), "diatom, centric");
    }

    #[test]
    fn file_has_header_and_sorted_rows() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.save("p2.tif", &AnnotationRecord::new(["b", "y"])).unwrap();
        s.save("p1.tif", &AnnotationRecord::new(["a", "x"])).unwrap();
        let text = std::fs::read_to_string(s.path()).unwrap();
        assert_eq!(text, "image,biological,species\np1.tif,a,x\np2.tif,b,y\n");
    }

    #[test]
    fn columns_matched_by_name() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        std::fs::create_dir_all(s.path().parent().unwrap()).unwrap();
        std::fs::write(s.path(), "species,image,extra\ndiatom,p1.tif,zzz\n").unwrap();
        assert_eq!(s.load("p1.tif").unwrap(), AnnotationRecord::new(["", "diatom"]));
    }

    #[test]
    fn stale_keys_are_kept() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.save("gone.tif", &AnnotationRecord::new(["old", "entry"])).unwrap();
        s.save("p1.tif", &AnnotationRecord::new(["new", ""])).unwrap();
        let all = s.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("gone.tif"));
    }

    #[test]
    fn rejects_empty_key_and_extra_values() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        assert!(matches!(
            s.save("", &AnnotationRecord::new(["a"])),
            Err(CyzError::InvalidAnnotation(_))
        ));
        assert!(matches!(
            s.save("p1.tif", &AnnotationRecord::new(["a", "b", "c"])),
            Err(CyzError::InvalidAnnotation(_))
        ));
        assert!(!s.path().exists());
    }

    #[test]
    fn missing_key_column_is_read_failure() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        std::fs::create_dir_all(s.path().parent().unwrap()).unwrap();
        std::fs::write(s.path(), "name,species\np1.tif,diatom\n").unwrap();
        assert!(matches!(
            s.load("p1.tif"),
            Err(CyzError::StorageReadFailure { .. })
        ));
    }

    #[test]
    fn no_temp_files_left_after_save() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.save("p1.tif", &AnnotationRecord::new(["a", "b"])).unwrap();
        let entries: Vec<_> = std::fs::read_dir(s.path().parent().unwrap())
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn unknown_columns_survive_a_save_with_other_fields() {
        let dir = TempDir::new().unwrap();
        let original = store(&dir);
        original
            .save("p1.tif", &AnnotationRecord::new(["algae", "diatom"]))
            .unwrap();

        let regrouped = AnnotationStore::new(original.path(), vec!["group".into()]);
        regrouped.save("p2.tif", &AnnotationRecord::new(["x"])).unwrap();

        let text = std::fs::read_to_string(original.path()).unwrap();
        assert_eq!(
            text,
            "image,group,biological,species\np1.tif,,algae,diatom\np2.tif,x,,\n"
        );
        assert_eq!(
            original.load("p1.tif").unwrap(),
            AnnotationRecord::new(["algae", "diatom"])
        );
        assert_eq!(regrouped.load("p2.tif").unwrap().get(0), "x");

        // Back on the original fields, the group column is carried along too.
        original
            .save("p1.tif", &AnnotationRecord::new(["algae", "centric"]))
            .unwrap();
        assert_eq!(regrouped.load("p2.tif").unwrap().get(0), "x");
    }

    #[test]
    fn blocked_directory_is_retryable_write_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("annotations");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let s = store(&dir);

        let record = AnnotationRecord::new(["algae", "diatom"]);
        let err = s.save("p1.tif", &record).unwrap_err();
        assert!(matches!(err, CyzError::StorageWriteFailure { .. }));
        assert!(err.is_retryable());

        std::fs::remove_file(&blocker).unwrap();
        s.save("p1.tif", &record).unwrap();
        assert_eq!(s.load("p1.tif").unwrap(), record);
    }

    #[cfg(unix)]
    #[test]
    fn failed_save_keeps_previous_file_and_can_be_retried() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let first = AnnotationRecord::new(["algae", "diatom"]);
        s.save("p1.tif", &first).unwrap();
        let before = std::fs::read(s.path()).unwrap();

        let ann_dir = s.path().parent().unwrap().to_path_buf();
        let set_mode = |mode| {
            std::fs::set_permissions(&ann_dir, std::fs::Permissions::from_mode(mode)).unwrap()
        };
        set_mode(0o555);

        // Privileged users ignore directory permissions.
        let check = ann_dir.join(".write-check");
        if std::fs::write(&check, b"").is_ok() {
            std::fs::remove_file(&check).ok();
            set_mode(0o755);
            println!("SKIP — directory permissions are not enforced for this user");
            return;
        }

        let second = AnnotationRecord::new(["detritus", ""]);
        let err = s.save("p2.tif", &second).unwrap_err();
        assert!(matches!(err, CyzError::StorageWriteFailure { .. }));
        assert_eq!(std::fs::read(s.path()).unwrap(), before);
        assert_eq!(s.load("p1.tif").unwrap(), first);
        assert!(s.load("p2.tif").unwrap().is_empty());

        set_mode(0o755);
        s.save("p2.tif", &second).unwrap();
        assert_eq!(s.load("p2.tif").unwrap(), second);
        assert_eq!(s.load("p1.tif").unwrap(), first);
    }
}
