//! Structured relay log (spec.md C8): on the first observation of each
//! block hash, append a line to `blockrelay.log` and flush. Subsequent
//! observations of the same hash are suppressed globally (P4) — this is
//! the only global dedup point in the system; everything upstream of it
//! (inventory trackers, object pools) is per-peer or per-pool.

pub mod rdns;

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use relay_types::{Hash32, SourceTag};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

pub use rdns::resolve_ptr;

pub struct RelayLog {
    file: Mutex<File>,
    seen: Mutex<HashSet<Hash32>>,
}

impl RelayLog {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self {
            file: Mutex::new(file),
            seen: Mutex::new(HashSet::new()),
        })
    }

    /// Appends the first-seen line for `hash`, plus any accumulated stats
    /// lines (non-empty only for a [`SourceTag::RelayPeer`] source — see
    /// spec.md §4.8), and flushes. Returns `false` without writing anything
    /// if this hash has already been logged.
    pub async fn log_first_seen(
        &self,
        hash: Hash32,
        source: SourceTag,
        addr: IpAddr,
        rdns: Option<&str>,
        stats_lines: &[String],
    ) -> std::io::Result<bool> {
        {
            let mut seen = self.seen.lock().await;
            if !seen.insert(hash) {
                return Ok(false);
            }
        }

        let ms_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let addr_string = addr.to_string();
        let host = rdns.unwrap_or(&addr_string);

        let mut line = format!(
            "{} {} {} from {}/{}\n",
            relay_types::short_hex(&hash),
            ms_epoch,
            source,
            addr,
            host,
        );
        for stats_line in stats_lines {
            line.push_str(stats_line);
            line.push('\n');
        }

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(hash = %relay_types::short_hex(&hash), %source, "first-seen logged");

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use tempfile_path::temp_log_path;

    use super::*;

    mod tempfile_path {
        use std::env;
        use std::time::{SystemTime, UNIX_EPOCH};

        pub fn temp_log_path() -> std::path::PathBuf {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            env::temp_dir().join(format!("relaylog-test-{nanos}.log"))
        }
    }

    #[tokio::test]
    async fn first_seen_suppresses_duplicates() {
        let path = temp_log_path();
        let log = RelayLog::open(&path).await.unwrap();
        let hash = [0xAAu8; 32];
        let addr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

        let first = log
            .log_first_seen(hash, SourceTag::P2pSpv, addr, None, &[])
            .await
            .unwrap();
        let second = log
            .log_first_seen(hash, SourceTag::P2pSpv, addr, None, &[])
            .await
            .unwrap();

        assert!(first);
        assert!(!second);

        let _ = std::fs::remove_file(&path);
    }
}
