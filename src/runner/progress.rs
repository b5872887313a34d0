//! Normalization of raw backend progress into the public event stream

use crate::source::{RawPhase, RawProgress};
use crate::types::{OperationId, ProgressEvent};

/// Turns raw backend reports into ordered, deduplicated transfer events.
///
/// Guarantees made here:
/// - percentages are whole numbers, truncated (never rounded up), clamped
///   to 0-100, and never decrease across the transfer
/// - when the total size is unknown the percentage is omitted entirely
/// - reports advancing less than `min_step` percent are dropped, except
///   the first report and any report reaching 100
/// - at most one `Finalizing` event is produced
///
/// Terminal events are never produced here; the worker owns those.
pub(super) struct ProgressNormalizer {
    id: OperationId,
    min_step: u8,
    last_percent: Option<u8>,
    seen_transfer: bool,
    finalizing_emitted: bool,
}

impl ProgressNormalizer {
    pub(super) fn new(id: OperationId, min_step: u8) -> Self {
        ProgressNormalizer {
            id,
            min_step,
            last_percent: None,
            seen_transfer: false,
            finalizing_emitted: false,
        }
    }

    /// True once a `Finalizing` event has been handed out.
    pub(super) fn finalizing_emitted(&self) -> bool {
        self.finalizing_emitted
    }

    /// Maps one raw report onto zero or one public event.
    pub(super) fn normalize(&mut self, raw: &RawProgress) -> Option<ProgressEvent> {
        match raw.phase {
            RawPhase::Downloading => self.normalize_transfer(raw),
            RawPhase::Finished => {
                if self.finalizing_emitted {
                    return None;
                }
                self.finalizing_emitted = true;
                Some(ProgressEvent::Finalizing { id: self.id })
            }
            // Backend errors surface through the fetch result; reporting
            // them here would duplicate the terminal event.
            RawPhase::Error => None,
        }
    }

    fn normalize_transfer(&mut self, raw: &RawProgress) -> Option<ProgressEvent> {
        let percent = raw.total_bytes.map(|total| {
            let computed = compute_percent(raw.downloaded_bytes, total);
            // Backends occasionally revise totals mid-transfer; never let
            // the reported percentage move backwards.
            self.last_percent.map_or(computed, |last| computed.max(last))
        });

        let first = !self.seen_transfer;
        if let (Some(percent), Some(last)) = (percent, self.last_percent) {
            if !first && percent != 100 && percent.saturating_sub(last) < self.min_step {
                return None;
            }
        }

        self.seen_transfer = true;
        if let Some(percent) = percent {
            self.last_percent = Some(percent);
        }

        Some(ProgressEvent::Transferring {
            id: self.id,
            bytes_done: raw.downloaded_bytes,
            bytes_total: raw.total_bytes,
            rate_bps: raw.rate_bps,
            eta_seconds: raw.eta_seconds,
            percent,
        })
    }
}

/// Whole-number completion percentage, truncated and clamped to 0-100.
fn compute_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = done.saturating_mul(100) / total;
    percent.min(100) as u8
}
