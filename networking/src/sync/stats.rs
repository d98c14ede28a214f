use std::fmt::Write as _;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::System;

use crate::lru_cache::RecencyCache;

/// Peers listed in the seed and leech tables.
const TOP_PEERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Status,
    Headers,
    Bodies,
}

impl RequestType {
    const ALL: [RequestType; 3] = [RequestType::Status, RequestType::Headers, RequestType::Bodies];

    fn index(self) -> usize {
        match self {
            RequestType::Status => 0,
            RequestType::Headers => 1,
            RequestType::Bodies => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            RequestType::Status => "status",
            RequestType::Headers => "headers",
            RequestType::Bodies => "bodies",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Imported,
    Stored,
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub status: u64,
    pub headers: u64,
    pub bodies: u64,
}

impl RequestCounts {
    pub fn total(&self) -> u64 {
        self.status + self.headers + self.bodies
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCounts {
    pub imported: u64,
    pub stored: u64,
    pub ignored: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ResponseTimes {
    count: u64,
    total: Duration,
}

impl ResponseTimes {
    fn average(&self) -> Option<Duration> {
        match u32::try_from(self.count) {
            Ok(count) => self.total.checked_div(count),
            Err(_) => Some(self.total.div_f64(self.count as f64)),
        }
    }
}

struct StatsInner {
    total_imported: u64,
    requests: RecencyCache<String, RequestCounts>,
    blocks: RecencyCache<String, BlockCounts>,
    served: RecencyCache<String, u64>,
    sent_at: RecencyCache<(String, RequestType), Instant>,
    responses: RecencyCache<String, [ResponseTimes; 3]>,
}

/// Per-peer sync statistics. Every table holds at most `capacity` peers.
pub struct SyncStats {
    started: Instant,
    inner: Mutex<StatsInner>,
}

impl SyncStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(StatsInner {
                total_imported: 0,
                requests: RecencyCache::new(capacity),
                blocks: RecencyCache::new(capacity),
                served: RecencyCache::new(capacity),
                sent_at: RecencyCache::new(capacity * RequestType::ALL.len()),
                responses: RecencyCache::new(capacity),
            }),
        }
    }

    pub fn add_imported(&self, count: u64) {
        self.inner.lock().total_imported += count;
    }

    pub fn total_imported(&self) -> u64 {
        self.inner.lock().total_imported
    }

    /// Blocks imported per second since start.
    pub fn avg_import_rate(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.total_imported() as f64 / elapsed
    }

    pub fn record_request(&self, display_id: &str, kind: RequestType, now: Instant) {
        let mut inner = self.inner.lock();
        inner.requests.update_or_insert(display_id.to_string(), RequestCounts::default, |counts| match kind {
            RequestType::Status => counts.status += 1,
            RequestType::Headers => counts.headers += 1,
            RequestType::Bodies => counts.bodies += 1,
        });
        inner.sent_at.put((display_id.to_string(), kind), now);
    }

    /// Record the response to the last request of `kind` sent to the peer.
    pub fn record_response(&self, display_id: &str, kind: RequestType, now: Instant) -> Option<Duration> {
        let mut inner = self.inner.lock();
        let sent = inner.sent_at.remove(&(display_id.to_string(), kind))?;
        let elapsed = now.saturating_duration_since(sent);
        inner.responses.update_or_insert(display_id.to_string(), Default::default, |times| {
            let slot = &mut times[kind.index()];
            slot.count += 1;
            slot.total += elapsed;
        });
        Some(elapsed)
    }

    pub fn record_blocks(&self, display_id: &str, outcome: BlockOutcome, count: u64) {
        if count == 0 {
            return;
        }
        self.inner
            .lock()
            .blocks
            .update_or_insert(display_id.to_string(), BlockCounts::default, |blocks| match outcome {
                BlockOutcome::Imported => blocks.imported += count,
                BlockOutcome::Stored => blocks.stored += count,
                BlockOutcome::Ignored => blocks.ignored += count,
            });
    }

    pub fn record_served(&self, display_id: &str, count: u64) {
        if count == 0 {
            return;
        }
        self.inner
            .lock()
            .served
            .update_or_insert(display_id.to_string(), || 0, |served| *served += count);
    }

    pub fn requests(&self, display_id: &str) -> Option<RequestCounts> {
        self.inner.lock().requests.peek(&display_id.to_string()).copied()
    }

    pub fn blocks(&self, display_id: &str) -> Option<BlockCounts> {
        self.inner.lock().blocks.peek(&display_id.to_string()).copied()
    }

    pub fn served(&self, display_id: &str) -> u64 {
        self.inner.lock().served.peek(&display_id.to_string()).copied().unwrap_or_default()
    }

    pub fn dump_requests(&self) -> String {
        let inner = self.inner.lock();
        let mut rows: Vec<(&String, &RequestCounts)> = inner.requests.iter().collect();
        rows.sort_by(|a, b| b.1.total().cmp(&a.1.total()).then_with(|| a.0.cmp(b.0)));

        let mut out = banner("sync-requests");
        let _ = writeln!(out, " {:<8} {:>8} {:>8} {:>8} {:>8}", "peer", "total", "status", "headers", "bodies");
        for (peer, counts) in rows {
            let _ = writeln!(
                out,
                " {:<8} {:>8} {:>8} {:>8} {:>8}",
                peer,
                counts.total(),
                counts.status,
                counts.headers,
                counts.bodies
            );
        }
        out
    }

    /// Peers that supplied the most imported blocks.
    pub fn dump_seeds(&self) -> String {
        let inner = self.inner.lock();
        let mut rows: Vec<(&String, &BlockCounts)> = inner.blocks.iter().collect();
        rows.sort_by(|a, b| b.1.imported.cmp(&a.1.imported).then_with(|| a.0.cmp(b.0)));

        let mut out = banner("sync-top-seeds");
        let _ = writeln!(out, " {:<8} {:>10} {:>10} {:>10}", "peer", "imported", "stored", "ignored");
        for (peer, blocks) in rows.into_iter().take(TOP_PEERS) {
            let _ = writeln!(
                out,
                " {:<8} {:>10} {:>10} {:>10}",
                peer, blocks.imported, blocks.stored, blocks.ignored
            );
        }
        out
    }

    /// Peers that were served the most blocks.
    pub fn dump_leeches(&self) -> String {
        let inner = self.inner.lock();
        let mut rows: Vec<(&String, &u64)> = inner.served.iter().collect();
        rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let mut out = banner("sync-top-leeches");
        let _ = writeln!(out, " {:<8} {:>10}", "peer", "served");
        for (peer, served) in rows.into_iter().take(TOP_PEERS) {
            let _ = writeln!(out, " {:<8} {:>10}", peer, served);
        }
        out
    }

    pub fn dump_responses(&self) -> String {
        let inner = self.inner.lock();
        let mut out = banner("sync-responses");
        let _ = writeln!(out, " {:<8} {:<8} {:>8} {:>12}", "peer", "type", "count", "avg (ms)");

        let mut overall = [ResponseTimes::default(); 3];
        for (peer, times) in inner.responses.iter() {
            for kind in RequestType::ALL {
                let entry = times[kind.index()];
                let Some(avg) = entry.average() else {
                    continue;
                };
                overall[kind.index()].count += entry.count;
                overall[kind.index()].total += entry.total;
                let _ = writeln!(
                    out,
                    " {:<8} {:<8} {:>8} {:>12.2}",
                    peer,
                    kind.as_str(),
                    entry.count,
                    avg.as_secs_f64() * 1_000.0
                );
            }
        }
        for kind in RequestType::ALL {
            if let Some(avg) = overall[kind.index()].average() {
                let _ = writeln!(
                    out,
                    " {:<8} {:<8} {:>8} {:>12.2}",
                    "all",
                    kind.as_str(),
                    overall[kind.index()].count,
                    avg.as_secs_f64() * 1_000.0
                );
            }
        }
        out
    }

    pub fn dump_system_info(&self) -> String {
        let sys = System::new_all();
        let mut out = banner("sync-system-info");
        let _ = writeln!(
            out,
            " os: {}",
            System::long_os_version().unwrap_or_else(|| "Unknown".to_string())
        );
        let _ = writeln!(out, " cpus: {}", sys.cpus().len());
        let _ = writeln!(
            out,
            " memory: {} / {} MiB",
            sys.used_memory() / (1024 * 1024),
            sys.total_memory() / (1024 * 1024)
        );
        let _ = writeln!(out, " uptime: {} s", System::uptime());
        out
    }
}

fn banner(title: &str) -> String {
    format!("\n{:=^72}\n", format!(" {title} "))
}
