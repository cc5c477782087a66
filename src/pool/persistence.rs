//! Durable persistence of the cache set through a three-file rotation:
//! live, backup, and a tmp staging file swapped in by rename.
//!
//! `write` is called after any mutation that affects the cache; it holds the
//! pool mutex across the whole sequence to serialise writers (callers
//! guarantee this by calling it with the guard held). `read` runs once at
//! startup, before any writer has run.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::record::TunnelRecord;

/// Bound on a persisted URL's length.
pub const MAX_URL_LENGTH: usize = 2048;

/// The live/backup/tmp file triad derived from a single configured path.
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub live: PathBuf,
    pub backup: PathBuf,
    pub tmp: PathBuf,
}

impl CachePaths {
    pub fn derive(live: impl Into<PathBuf>) -> Self {
        let live = live.into();
        let backup = live.with_file_name(sibling_name(&live, "bak"));
        let tmp = live.with_file_name(sibling_name(&live, "tmp"));
        Self { live, backup, tmp }
    }
}

/// `TUNNELS` has no extension of its own, so `set_extension` would clobber
/// the whole file name — append `.bak`/`.tmp` to it instead.
fn sibling_name(path: &Path, suffix: &str) -> String {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    format!("{name}.{suffix}")
}

/// A record parsed out of the cache file: `(url, age)`.
pub struct ParsedRecord {
    pub url: String,
    pub age: u8,
}

/// Read the cache file, falling back to the backup on failure. Returns an
/// empty list and logs nothing further if both are unreadable.
pub async fn read(paths: &CachePaths) -> Vec<ParsedRecord> {
    let content = match tokio::fs::read_to_string(&paths.live).await {
        Ok(c) => c,
        Err(_) => match tokio::fs::read_to_string(&paths.backup).await {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        },
    };
    parse(&content)
}

fn parse(content: &str) -> Vec<ParsedRecord> {
    let mut records = Vec::new();
    for line in content.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_record_line(line) {
            Some(record) => records.push(record),
            None => {
                warn!("tunnel cache: malformed record line, stopping parse: {line:?}");
                break;
            }
        }
    }
    records
}

fn parse_record_line(line: &str) -> Option<ParsedRecord> {
    let mut parts = line.split(' ');
    let url = parts.next()?;
    let age_str = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if url.is_empty() || url.len() > MAX_URL_LENGTH || url.contains(char::is_whitespace) {
        return None;
    }
    let age: u16 = age_str.parse().ok()?;
    if age > u16::from(u8::MAX) {
        return None;
    }
    Some(ParsedRecord {
        url: url.to_string(),
        #[allow(clippy::cast_possible_truncation)]
        age: age as u8,
    })
}

/// Write every cache record with `age != 0` through the live/backup/tmp
/// rotation. Errors are logged and non-fatal — the next
/// mutation that triggers a write attempts the full sequence again.
pub async fn write(program: &str, records: impl Iterator<Item = &TunnelRecord>, paths: &CachePaths) {
    match tokio::fs::rename(&paths.live, &paths.backup).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // No live file yet (first run) — nothing to preserve as a backup.
        }
        Err(e) => {
            warn!("tunnel cache: failed to rotate {:?} -> {:?}: {e}", paths.live, paths.backup);
        }
    }

    let mut body = format!("# {program} tunnel cache\n# AUTOMATICALLY GENERATED, DO NOT EDIT\n\n");
    for record in records {
        if !record.age.is_persistable() {
            continue;
        }
        body.push_str(&format!(
            "# AGE = {}\n{} {}\n\n",
            record.age.get(),
            record.url,
            record.age.get()
        ));
    }

    if let Err(e) = write_tmp_then_rename(&body, paths).await {
        warn!("tunnel cache: failed to write {:?}: {e}", paths.live);
    }
}

async fn write_tmp_then_rename(body: &str, paths: &CachePaths) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(&paths.tmp).await?;
    file.write_all(body.as_bytes()).await?;
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&paths.tmp, &paths.live).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::record::{Age, IdGenerator, TunnelRecord};

    fn tmp_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("tunnelpool-test-{}", std::process::id()));
        dir.push(uuidish());
        dir
    }

    // Avoids pulling in the `uuid` crate just for test scratch directories.
    fn uuidish() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("{nanos:x}")
    }

    #[test]
    fn parses_skip_blank_and_comment_lines() {
        let content = "# header\n\n# AGE = 16\na://x 16\n\n# AGE = 8\na://y 8\n";
        let parsed = parse(content);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].url, "a://x");
        assert_eq!(parsed[0].age, 16);
        assert_eq!(parsed[1].url, "a://y");
        assert_eq!(parsed[1].age, 8);
    }

    #[test]
    fn malformed_line_stops_parsing_but_keeps_prior_records() {
        let content = "a://x 16\n\nnot a valid record\na://y 8\n";
        let parsed = parse(content);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].url, "a://x");
    }

    #[tokio::test]
    async fn round_trip_preserves_nonzero_age_records_and_drops_zero_age() {
        let dir = tmp_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let paths = CachePaths::derive(dir.join("TUNNELS"));

        let ids = IdGenerator::new();
        let mut a = TunnelRecord::new("a://x".to_string(), ids.next(), Age::new(16));
        a.age = Age::new(16);
        let mut b = TunnelRecord::new("a://y".to_string(), ids.next(), Age::new(0));
        b.age = Age::new(0);

        write("tunnelpool", vec![&a, &b].into_iter(), &paths).await;

        let parsed = read(&paths).await;
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].url, "a://x");
        assert_eq!(parsed[0].age, 16);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn read_falls_back_to_backup_when_live_missing() {
        let dir = tmp_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let paths = CachePaths::derive(dir.join("TUNNELS"));

        tokio::fs::write(&paths.backup, "a://backup 4\n").await.unwrap();
        let parsed = read(&paths).await;
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].url, "a://backup");

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn read_returns_empty_when_neither_file_exists() {
        let dir = tmp_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let paths = CachePaths::derive(dir.join("TUNNELS"));
        assert!(read(&paths).await.is_empty());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
