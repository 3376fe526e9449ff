//! Worker demand tracking.
//!
//! Every staging request the worker makes, successful or not, is recorded
//! per format family. At the end of a pass the numbers are folded into a
//! longer-lived history the main thread sizes the next batch of staging
//! buffers from.

use texstream_core::PixelFormat;

/// Updates a history entry survives without fresh demand.
pub const USAGE_STAT_LIFETIME: u32 = 15;

/// Row alignment used to size demand, independent of the backend.
const STAT_ROW_ALIGNMENT: u32 = 4;

/// Demand for one format family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStat {
    pub format_family: PixelFormat,
    /// Widest region requested.
    pub width: u32,
    /// Tallest region requested.
    pub height: u32,
    /// Bytes requested in total.
    pub accum_size_bytes: usize,
    /// Updates left before the entry expires (history only).
    pub loop_count: u32,
}

impl UsageStat {
    /// Bytes of one `width` x `height` slice of this family.
    pub fn one_slice_bytes(&self) -> usize {
        self.format_family
            .size_bytes(self.width, self.height, 1, 1, STAT_ROW_ALIGNMENT)
            .max(1)
    }

    /// Slices a staging buffer of `width` x `height` needs to absorb the
    /// accumulated demand, capped so the buffer stays under `max_bytes`.
    pub fn slices_needed(&self, max_bytes: usize) -> u32 {
        let one_slice = self.one_slice_bytes();
        let needed = self.accum_size_bytes.div_ceil(one_slice).max(1);
        let cap = (max_bytes / one_slice).max(1);
        needed.min(cap) as u32
    }
}

/// Record one staging request.
pub fn record(
    stats: &mut Vec<UsageStat>,
    format: PixelFormat,
    width: u32,
    height: u32,
    depth_or_slices: u32,
) {
    let family = format.family();
    let bytes = family.size_bytes(width, height, depth_or_slices, 1, STAT_ROW_ALIGNMENT);
    match stats.iter_mut().find(|s| s.format_family == family) {
        Some(stat) => {
            stat.width = stat.width.max(width);
            stat.height = stat.height.max(height);
            stat.accum_size_bytes += bytes;
        }
        None => stats.push(UsageStat {
            format_family: family,
            width,
            height,
            accum_size_bytes: bytes,
            loop_count: 0,
        }),
    }
}

/// Fold this pass's stats into the history and clear them.
///
/// A bigger current value replaces the history; a smaller one is averaged
/// with it so demand decays slowly.
pub fn merge_into_previous(current: &mut Vec<UsageStat>, previous: &mut Vec<UsageStat>) {
    for stat in current.drain(..) {
        match previous
            .iter_mut()
            .find(|p| p.format_family == stat.format_family)
        {
            Some(prev) => {
                prev.width = stat.width.max((prev.width + stat.width) >> 1);
                prev.height = stat.height.max((prev.height + stat.height) >> 1);
                prev.accum_size_bytes = stat
                    .accum_size_bytes
                    .max((prev.accum_size_bytes + stat.accum_size_bytes) >> 1);
                prev.loop_count = USAGE_STAT_LIFETIME;
            }
            None => previous.push(UsageStat {
                loop_count: USAGE_STAT_LIFETIME,
                ..stat
            }),
        }
    }
}

/// Age the history by one update, dropping expired entries.
pub fn age(previous: &mut Vec<UsageStat>) {
    previous.retain_mut(|stat| {
        stat.loop_count = stat.loop_count.saturating_sub(1);
        stat.loop_count > 0
    });
}
