//! Section-to-region assignment and usage roll-ups.
//!
//! Every section lands in the single region containing its start address.
//! When hierarchical declarations make several regions match, the most
//! specific (smallest) one wins. Sections no region claims are collected
//! under the synthetic `__unmapped__` bucket.

use indexmap::IndexMap;

use crate::model::{MemoryRegion, RegionRollup, Section, Symbol};

/// Name of the synthetic roll-up bucket for unassigned sections.
pub const UNMAPPED: &str = "__unmapped__";

pub struct RegionMapper<'a> {
    regions: &'a IndexMap<String, MemoryRegion>,
    /// `(origin, end, name)` sorted by origin, for binary search.
    sorted: Vec<(u64, u64, &'a str)>,
}

impl<'a> RegionMapper<'a> {
    pub fn new(regions: &'a IndexMap<String, MemoryRegion>) -> Self {
        let mut sorted: Vec<(u64, u64, &str)> = regions
            .values()
            .map(|r| (r.origin, r.end(), r.name.as_str()))
            .collect();
        sorted.sort_by_key(|&(origin, end, _)| (origin, end));
        Self { regions, sorted }
    }

    /// Finds the most specific region containing `addr`.
    pub fn region_for(&self, addr: u64) -> Option<&'a MemoryRegion> {
        // Candidate regions all start at or before the address; scan back
        // from the partition point and keep the smallest hit.
        let upper = self.sorted.partition_point(|&(origin, _, _)| origin <= addr);
        let mut best: Option<&MemoryRegion> = None;
        for &(_, end, name) in self.sorted[..upper].iter().rev() {
            if addr < end {
                let region = &self.regions[name];
                if best.map_or(true, |b| region.length < b.length) {
                    best = Some(region);
                }
            }
        }
        best
    }

    /// Assigns sections and symbols to regions and computes the roll-ups.
    /// The roll-up map preserves region declaration order; `__unmapped__`
    /// appears last and only when needed.
    pub fn assign(
        &self,
        sections: &mut [Section],
        symbols: &mut [Symbol],
    ) -> IndexMap<String, RegionRollup> {
        let mut rollups: IndexMap<String, RegionRollup> = self
            .regions
            .keys()
            .map(|name| (name.clone(), RegionRollup::default()))
            .collect();
        let mut unmapped = RegionRollup::default();

        for section in sections.iter_mut() {
            match self.region_for(section.address) {
                Some(region) => {
                    section.region = Some(region.name.clone());
                    let rollup = &mut rollups[region.name.as_str()];
                    rollup.used += section.size_on_device(region);
                    rollup.sections.push(section.name.clone());
                }
                None => {
                    section.region = None;
                    unmapped.used += section.size;
                    unmapped.sections.push(section.name.clone());
                }
            }
        }

        for (name, rollup) in rollups.iter_mut() {
            let region = &self.regions[name.as_str()];
            rollup.utilization = utilization(rollup.used, region.length);
        }

        for symbol in symbols.iter_mut() {
            // Thumb function addresses carry bit 0; regions are declared on
            // even boundaries.
            let addr = symbol.address & !1;
            symbol.region = self.region_for(addr).map(|r| r.name.clone());
        }

        if !unmapped.sections.is_empty() {
            rollups.insert(UNMAPPED.to_string(), unmapped);
        }
        rollups
    }
}

/// Percent used, clamped and rounded to two decimal places.
pub fn utilization(used: u64, length: u64) -> f64 {
    if length == 0 {
        return 0.0;
    }
    let pct = (used as f64 / length as f64) * 100.0;
    (pct.clamp(0.0, 100.0) * 100.0).round() / 100.0
}
