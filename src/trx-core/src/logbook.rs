// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Append-only ADIF logbook and in-memory worked-index (§4.8).
//!
//! This module owns the ADIF file handle exclusively; no other collaborator
//! touches it. Mutators are synchronous (`std::fs`) -- the caller (the
//! server binary) is responsible for running them off the async executor's
//! thread, e.g. via `tokio::task::spawn_blocking`, since a file append is a
//! suspension point per §5.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::qso::{worked_key, QsoRecord};

const ADIF_HEADER: &str = "trx-rs autonomous QSO log\n<ADIF_VER:5>3.1.0\n<PROGRAMID:6>trx-rs\n<EOH>\n";

/// `(call, band, mode)` → ISO-UTC timestamp of the most recent contact.
pub type WorkedIndex = HashMap<String, String>;

pub struct Logbook {
    path: PathBuf,
    worked: WorkedIndex,
    my_call: String,
    my_grid: Option<String>,
}

impl Logbook {
    /// Open (or create) the ADIF file at `path` and build the worked-index
    /// by scanning its existing contents. On catastrophic parse failure the
    /// file is backed up with a timestamped suffix and a fresh one started.
    pub fn open(path: impl Into<PathBuf>, my_call: &str, my_grid: Option<&str>) -> Self {
        let path = path.into();
        let mut logbook = Self {
            path,
            worked: WorkedIndex::new(),
            my_call: my_call.to_ascii_uppercase(),
            my_grid: my_grid.map(str::to_string),
        };
        logbook.load_or_reset();
        logbook
    }

    fn load_or_reset(&mut self) {
        let Ok(content) = fs::read_to_string(&self.path) else {
            self.init_fresh_file();
            return;
        };

        match parse_worked_index(&content) {
            Ok(index) => self.worked = index,
            Err(_) => {
                self.backup_corrupt_file();
                self.init_fresh_file();
            }
        }
    }

    fn init_fresh_file(&self) {
        if self.path.exists() {
            return;
        }
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = fs::write(&self.path, ADIF_HEADER);
    }

    fn backup_corrupt_file(&self) {
        let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let backup = self.path.with_extension(format!("adi.{ts}.bak"));
        let _ = fs::rename(&self.path, backup);
    }

    pub fn worked_index(&self) -> &WorkedIndex {
        &self.worked
    }

    pub fn is_worked(&self, call: &str, band: &str, mode: &str) -> bool {
        self.worked.contains_key(&worked_key(call, band, mode))
    }

    pub fn is_worked_on_band(&self, call: &str, band: &str) -> bool {
        let prefix = format!("{}:{}:", call.to_ascii_uppercase(), band.to_ascii_lowercase());
        self.worked.keys().any(|k| k.starts_with(&prefix))
    }

    pub fn is_worked_anywhere(&self, call: &str) -> bool {
        let prefix = format!("{}:", call.to_ascii_uppercase());
        self.worked.keys().any(|k| k.starts_with(&prefix))
    }

    /// Append a QSO record to the ADIF file and update the worked-index.
    /// The caller already holds whatever state-core mutation is needed;
    /// this only touches the logbook's own data.
    pub fn log_qso(&mut self, record: &QsoRecord) -> Result<(), CoreError> {
        let line = to_adif_record(record, &self.my_call, self.my_grid.as_deref());
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoreError::AdifWriteFailed(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| CoreError::AdifWriteFailed(e.to_string()))?;
        file.flush()
            .map_err(|e| CoreError::AdifWriteFailed(e.to_string()))?;

        let key = worked_key(&record.call, &record.band, &record.mode);
        self.worked.insert(key, record.time_off.clone());
        Ok(())
    }

    /// Back up the current file and reinitialize with an empty header.
    pub fn clear_logbook(&mut self) -> Result<(), CoreError> {
        if self.path.exists() {
            let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
            let backup = self.path.with_extension(format!("adi.{ts}.bak"));
            fs::rename(&self.path, backup).map_err(|e| CoreError::AdifWriteFailed(e.to_string()))?;
        }
        self.worked.clear();
        self.init_fresh_file();
        Ok(())
    }

    /// Copy the current log file to `dest`.
    pub fn export_to_file(&self, dest: &Path) -> Result<(), CoreError> {
        fs::copy(&self.path, dest)
            .map(|_| ())
            .map_err(|e| CoreError::AdifWriteFailed(e.to_string()))
    }

    /// Scan an external ADIF file and merge previously-unseen worked keys.
    /// Existing keys are left untouched (the in-file log is authoritative
    /// for its own entries).
    pub fn import_from_file(&mut self, src: &Path) -> Result<usize, CoreError> {
        let content = fs::read_to_string(src).map_err(|e| CoreError::AdifParseFailed(e.to_string()))?;
        let incoming = parse_worked_index(&content)?;
        let mut added = 0;
        for (key, ts) in incoming {
            self.worked.entry(key).or_insert_with(|| {
                added += 1;
                ts
            });
        }
        Ok(added)
    }
}

/// Parse the ADIF data region (after `<EOH>`) into a worked-index. Malformed
/// individual records are skipped; only total unparsability is an error.
fn parse_worked_index(content: &str) -> Result<WorkedIndex, CoreError> {
    let upper = content.to_ascii_uppercase();
    let Some(pos) = upper.find("<EOH>") else {
        return Err(CoreError::AdifParseFailed("missing <EOH> header".into()));
    };
    let data = &content[pos + "<EOH>".len()..];

    let mut index = WorkedIndex::new();
    for raw_record in data.split("<EOR>") {
        let record = raw_record.trim();
        if record.is_empty() {
            continue;
        }
        if let Some((key, ts)) = parse_adif_record(record) {
            index.insert(key, ts);
        }
    }
    Ok(index)
}

fn parse_adif_tag<'a>(record: &'a str, tag: &str) -> Option<&'a str> {
    let upper = record.to_ascii_uppercase();
    let needle = format!("<{}:", tag.to_ascii_uppercase());
    let start = upper.find(&needle)?;
    let after_tag = start + needle.len();
    let len_end = upper[after_tag..].find('>')? + after_tag;
    let len: usize = upper[after_tag..len_end].split(':').next()?.parse().ok()?;
    let value_start = len_end + 1;
    record.get(value_start..value_start + len)
}

fn parse_adif_record(record: &str) -> Option<(String, String)> {
    let call = parse_adif_tag(record, "CALL")?;
    let band = parse_adif_tag(record, "BAND")?;
    let mode = parse_adif_tag(record, "MODE")?;
    let date = parse_adif_tag(record, "QSO_DATE")?;
    let time = parse_adif_tag(record, "TIME_OFF")
        .or_else(|| parse_adif_tag(record, "TIME_ON"))?;
    let ts = adif_date_time_to_iso(date, time)?;
    Some((worked_key(call, band, mode), ts))
}

fn adif_date_time_to_iso(date: &str, time: &str) -> Option<String> {
    if date.len() != 8 {
        return None;
    }
    let (y, m, d) = (&date[0..4], &date[4..6], &date[6..8]);
    let mut t = time.to_string();
    if t.len() == 4 {
        t.push_str("00");
    }
    if t.len() != 6 {
        return None;
    }
    let (hh, mm, ss) = (&t[0..2], &t[2..4], &t[4..6]);
    Some(format!("{y}-{m}-{d}T{hh}:{mm}:{ss}Z"))
}

fn adif_field(tag: &str, value: &str) -> String {
    format!("<{}:{}>{}", tag, value.len(), value)
}

/// Render one QSO record as a single ADIF-3.1.0 line, `<EOR>`-terminated.
/// CRLF-free by construction: the whole record lives on one LF-terminated
/// line, the way WSJT-X's own ADIF writer emits them.
fn to_adif_record(record: &QsoRecord, my_call: &str, my_grid: Option<&str>) -> String {
    let (date, time_on) = iso_to_adif_date_time(&record.time_on);
    let (_, time_off) = iso_to_adif_date_time(&record.time_off);
    let freq_mhz = record.dial_hz as f64 / 1_000_000.0;

    let mut line = String::new();
    line.push_str(&adif_field("CALL", &record.call.to_ascii_uppercase()));
    line.push_str(&adif_field("QSO_DATE", &date));
    line.push_str(&adif_field("TIME_ON", &time_on));
    line.push_str(&adif_field("TIME_OFF", &time_off));
    line.push_str(&adif_field("BAND", &record.band));
    line.push_str(&adif_field("FREQ", &format!("{:.6}", freq_mhz)));
    line.push_str(&adif_field("MODE", &record.mode.to_ascii_uppercase()));
    if let Some(sent) = &record.report_sent {
        line.push_str(&adif_field("RST_SENT", sent));
    }
    if let Some(rcvd) = &record.report_received {
        line.push_str(&adif_field("RST_RCVD", rcvd));
    }
    if let Some(grid) = &record.grid {
        line.push_str(&adif_field("GRIDSQUARE", grid));
    }
    if let Some(power) = record.tx_power_watts {
        line.push_str(&adif_field("TX_PWR", &power.to_string()));
    }
    if let Some(notes) = &record.notes {
        line.push_str(&adif_field("COMMENT", notes));
    }
    if let Some(grid) = my_grid {
        line.push_str(&adif_field("MY_GRIDSQUARE", grid));
    }
    line.push_str(&adif_field("STATION_CALLSIGN", my_call));
    line.push_str("<EOR>\n");
    line
}

/// `2026-07-28T14:03:12.500Z` → (`20260728`, `140312`).
fn iso_to_adif_date_time(iso: &str) -> (String, String) {
    let date = iso.get(0..4).unwrap_or("1970").to_string()
        + iso.get(5..7).unwrap_or("01")
        + iso.get(8..10).unwrap_or("01");
    let time = iso.get(11..13).unwrap_or("00").to_string()
        + iso.get(14..16).unwrap_or("00")
        + iso.get(17..19).unwrap_or("00");
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> QsoRecord {
        QsoRecord {
            time_on: "2026-07-28T14:02:00.000Z".into(),
            time_off: "2026-07-28T14:03:12.500Z".into(),
            call: "ea4ifi".into(),
            grid: Some("IM79".into()),
            band: "20m".into(),
            dial_hz: 14_074_000,
            mode: "FT8".into(),
            report_sent: Some("+03".into()),
            report_received: Some("-05".into()),
            tx_power_watts: Some(50),
            letter: 'B',
            channel_index: 1,
            instance_name: "wsjtx-B".into(),
            notes: None,
        }
    }

    #[test]
    fn logging_a_qso_updates_worked_index() {
        let dir = tempdir();
        let mut log = Logbook::open(dir.join("log.adi"), "K1XYZ", Some("FN42"));
        assert!(!log.is_worked("EA4IFI", "20m", "FT8"));
        log.log_qso(&sample_record()).unwrap();
        assert!(log.is_worked("EA4IFI", "20m", "FT8"));
        assert!(log.is_worked_on_band("EA4IFI", "20m"));
        assert!(log.is_worked_anywhere("ea4ifi"));
    }

    #[test]
    fn logging_the_same_qso_twice_overwrites_not_duplicates_the_index() {
        let dir = tempdir();
        let mut log = Logbook::open(dir.join("log.adi"), "K1XYZ", None);
        log.log_qso(&sample_record()).unwrap();
        log.log_qso(&sample_record()).unwrap();
        assert_eq!(log.worked_index().len(), 1);
        let content = fs::read_to_string(dir.join("log.adi")).unwrap();
        assert_eq!(content.matches("<EOR>").count(), 2);
    }

    #[test]
    fn reopening_restores_worked_index_from_disk() {
        let dir = tempdir();
        let path = dir.join("log.adi");
        {
            let mut log = Logbook::open(&path, "K1XYZ", None);
            log.log_qso(&sample_record()).unwrap();
        }
        let reopened = Logbook::open(&path, "K1XYZ", None);
        assert!(reopened.is_worked("EA4IFI", "20m", "FT8"));
    }

    #[test]
    fn corrupt_file_is_backed_up_and_replaced() {
        let dir = tempdir();
        let path = dir.join("log.adi");
        fs::write(&path, "<this is not adif at all, no EOH marker>").unwrap();
        let log = Logbook::open(&path, "K1XYZ", None);
        assert!(log.worked_index().is_empty());
        let siblings: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(siblings.len() >= 2, "expected a .bak file next to the fresh log");
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "trx-rs-logbook-test-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
