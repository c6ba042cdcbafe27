//! Compressed full dumps of one cache.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{Datelike, Timelike};
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::layout::Layout;
use super::scan::Scan;
use super::store::CacheStore;
use crate::{Error, Timestamp};

/// What a finished archive build produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    /// Newest entry timestamp, also the archive file's own mtime.
    pub timestamp: Timestamp,
    pub entries: usize,
}

impl CacheStore {
    /// Rebuild `<name>.zip` from every committed entry.
    ///
    /// The archive is written to `<name>.generate` and renamed into place
    /// only when complete. While `throttle` is set the build sleeps `pause`
    /// after each entry; the flag is re-read per entry so a caller can lift
    /// it mid-build.
    pub async fn build_archive(&self, throttle: Arc<AtomicBool>, pause: Duration) -> Result<ArchiveSummary, Error> {
        let layout = Arc::clone(self.layout());
        tokio::task::spawn_blocking(move || {
            let result = write_archive(&layout, &throttle, pause);
            if result.is_err() {
                let _ = fs::remove_file(layout.archive_temp_path());
            }
            result
        })
        .await?
    }
}

fn write_archive(layout: &Arc<Layout>, throttle: &AtomicBool, pause: Duration) -> Result<ArchiveSummary, Error> {
    let temp_path = layout.archive_temp_path();
    let mut zip = ZipWriter::new(BufWriter::new(File::create(&temp_path)?));
    let mut newest = Timestamp::ZERO;
    let mut entries = 0;

    for entry in Scan::new(Arc::clone(layout))? {
        let entry = entry?;
        let path = layout.entry_path(&entry.doc_id);
        let mut source = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        // Tag with the version actually opened, not the one scanned.
        let timestamp = Timestamp::from_system_time(source.metadata()?.modified()?);

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip_time(timestamp));
        zip.start_file(layout.entry_file_name(&entry.doc_id), options)?;
        io::copy(&mut source, &mut zip)?;

        newest = newest.max(timestamp);
        entries += 1;

        if throttle.load(Ordering::Relaxed) {
            std::thread::sleep(pause);
        }
    }

    let writer = zip.finish()?;
    let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    file.set_modified(newest.to_system_time())?;
    drop(file);

    fs::rename(&temp_path, layout.archive_path())?;
    Ok(ArchiveSummary { timestamp: newest, entries })
}

/// Zip stores DOS local time (1980..=2107); out-of-range stamps use the default.
fn zip_time(timestamp: Timestamp) -> zip::DateTime {
    let at = timestamp.to_datetime();
    let Ok(year) = u16::try_from(at.year()) else {
        return zip::DateTime::default();
    };
    zip::DateTime::from_date_and_time(
        year,
        at.month() as u8,
        at.day() as u8,
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
    )
    .unwrap_or_default()
}
