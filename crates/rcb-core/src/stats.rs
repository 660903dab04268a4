//! Runtime statistics owned by the controller and the enrichment client.
//!
//! Owners mutate their own struct; readers only ever see cloned snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};

use crate::domain::RunState;

/// Poll loop statistics (reset partially on every start).
#[derive(Clone, Debug, Default)]
pub struct RunStats {
    pub started_at: Option<DateTime<Local>>,
    pub posts_sent: u64,
    pub posts_enriched: u64,
    pub errors: u64,
    pub publish_failures: u64,
    pub last_check: Option<DateTime<Local>>,
    pub last_post: Option<DateTime<Local>>,
    pub last_error: Option<DateTime<Local>>,
    pub last_enrichment_error: Option<String>,
}

/// Failure category of an enrichment request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnrichmentErrorKind {
    Timeout,
    Connection,
    Http,
    General,
}

impl EnrichmentErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            EnrichmentErrorKind::Timeout => "Timeout",
            EnrichmentErrorKind::Connection => "Connection Error",
            EnrichmentErrorKind::Http => "HTTP Error",
            EnrichmentErrorKind::General => "General Error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastEnrichmentError {
    pub at: DateTime<Local>,
    pub kind: EnrichmentErrorKind,
    pub code: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct EnrichmentStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub successful: u64,
    pub errors: u64,
    pub errors_by_kind: BTreeMap<EnrichmentErrorKind, u64>,
    pub error_codes: BTreeMap<u16, u64>,
    pub last_success: Option<DateTime<Local>>,
    pub last_error: Option<LastEnrichmentError>,
}

impl EnrichmentStats {
    pub fn record_error(&mut self, kind: EnrichmentErrorKind, code: Option<u16>) {
        self.errors += 1;
        *self.errors_by_kind.entry(kind).or_insert(0) += 1;
        if let Some(code) = code {
            *self.error_codes.entry(code).or_insert(0) += 1;
        }
        self.last_error = Some(LastEnrichmentError {
            at: Local::now(),
            kind,
            code,
        });
    }

    pub fn errors_for_code(&self, code: u16) -> u64 {
        self.error_codes.get(&code).copied().unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct CacheInfo {
    pub enabled: bool,
    pub records: usize,
}

/// Everything the status report needs, captured at one point in time.
#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub state: RunState,
    pub run: RunStats,
    pub sources: usize,
    pub seen_entries: usize,
    pub enrichment_enabled: bool,
    pub enrichment_model: Option<String>,
    pub enrichment: Option<EnrichmentStats>,
    pub cache: Option<CacheInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_error_counts_kind_and_code() {
        let mut s = EnrichmentStats::default();
        s.record_error(EnrichmentErrorKind::Http, Some(429));
        s.record_error(EnrichmentErrorKind::Http, Some(429));
        s.record_error(EnrichmentErrorKind::Timeout, None);

        assert_eq!(s.errors, 3);
        assert_eq!(s.errors_for_code(429), 2);
        assert_eq!(s.errors_for_code(500), 0);
        assert_eq!(s.errors_by_kind[&EnrichmentErrorKind::Http], 2);
        assert_eq!(s.errors_by_kind[&EnrichmentErrorKind::Timeout], 1);
        let last = s.last_error.unwrap();
        assert_eq!(last.kind, EnrichmentErrorKind::Timeout);
        assert_eq!(last.code, None);
    }
}
