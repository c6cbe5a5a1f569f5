// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::errors::Error;
use crate::model::hwp::hwp_biallelic;
use crate::model::{Genotype, Includes, Locus};

/// A comma separated list of genomic ranges `S-E` with optional open ends.
/// The end coordinate is exclusive. Reversed bounds are normalized; a fully
/// open range subsumes all others.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomicRanges(Vec<(u64, u64)>);

impl GenomicRanges {
    pub fn contains(&self, location: u64) -> bool {
        self.0
            .iter()
            .any(|&(start, stop)| start <= location && location < stop)
    }
}

impl FromStr for GenomicRanges {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let invalid = |spec: &str| Error::InvalidRange {
            spec: spec.to_owned(),
        };

        let mut ranges = Vec::new();
        for range in s.split(',') {
            let mut bounds = range.splitn(2, '-');
            let start = bounds.next().unwrap_or("");
            let stop = bounds.next().ok_or_else(|| invalid(range))?;

            let start = if start.is_empty() {
                0
            } else {
                start.parse().map_err(|_| invalid(range))?
            };
            let stop = if stop.is_empty() {
                u64::max_value()
            } else {
                stop.parse().map_err(|_| invalid(range))?
            };

            let (start, stop) = if stop < start {
                (stop, start)
            } else {
                (start, stop)
            };
            ranges.push((start, stop));
        }

        if ranges.contains(&(0, u64::max_value())) {
            ranges = vec![(0, u64::max_value())];
        }

        Ok(GenomicRanges(ranges))
    }
}

/// Valid and total genotype counts of a locus.
pub fn completion(genos: &[Genotype]) -> (usize, usize) {
    (
        genos.iter().filter(|g| !g.is_missing()).count(),
        genos.len(),
    )
}

/// Filter loci by minimum MAF. Obligate tags are held to their own
/// (typically laxer) minimum.
pub fn filter_loci_by_maf(
    loci: Vec<Locus>,
    minmaf: f64,
    minobmaf: f64,
    include: &Includes,
) -> Vec<Locus> {
    loci.into_iter()
        .filter(|locus| {
            let threshold = if include.contains(&locus.name) {
                minobmaf
            } else {
                minmaf
            };
            locus.maf >= threshold
        })
        .collect()
}

pub fn filter_loci_by_inclusion(loci: Vec<Locus>, subset: &BTreeSet<String>) -> Vec<Locus> {
    loci.into_iter()
        .filter(|locus| subset.contains(&locus.name))
        .collect()
}

pub fn filter_loci_by_range(loci: Vec<Locus>, ranges: &GenomicRanges) -> Vec<Locus> {
    loci.into_iter()
        .filter(|locus| ranges.contains(locus.location))
        .collect()
}

pub fn filter_loci_by_completion(
    loci: Vec<Locus>,
    mincompletion: usize,
    mincompletionrate: f64,
) -> Vec<Locus> {
    loci.into_iter()
        .filter(|locus| {
            let (m, n) = completion(&locus.genos);
            let rate = if n > 0 { m as f64 / n as f64 } else { 0. };
            m >= mincompletion && rate >= mincompletionrate
        })
        .collect()
}

/// Filter loci failing a minimum Hardy-Weinberg proportion p-value.
pub fn filter_loci_by_hwp(loci: Vec<Locus>, pvalue: f64) -> Vec<Locus> {
    loci.into_iter()
        .filter(|locus| hwp_biallelic(&locus.genos) >= pvalue)
        .collect()
}

/// Keep only loci within `maxdist` of a monitored locus. Two linear passes
/// over the location-sorted loci, one forward and one in reverse, mark
/// everything downstream respectively upstream of each monitored location.
pub fn filter_loci_ldsubset(
    loci: Vec<Locus>,
    ldsubset: &BTreeSet<String>,
    maxdist: u64,
) -> Vec<Locus> {
    if ldsubset.is_empty() {
        return loci;
    }

    let mut monitor: Vec<u64> = loci
        .iter()
        .filter(|l| ldsubset.contains(&l.name))
        .map(|l| l.location)
        .collect();
    monitor.sort_unstable();

    let n = loci.len();
    let mut keep = vec![false; n];

    let mut pos = 0;
    for &m in &monitor {
        while pos < n && loci[pos].location < m {
            pos += 1;
        }
        while pos < n && loci[pos].location - m <= maxdist {
            keep[pos] = true;
            pos += 1;
        }
    }

    let mut pos = n as i64 - 1;
    for &m in monitor.iter().rev() {
        while pos >= 0 && loci[pos as usize].location > m {
            pos -= 1;
        }
        while pos >= 0 && m - loci[pos as usize].location <= maxdist {
            keep[pos as usize] = true;
            pos -= 1;
        }
    }

    loci.into_iter()
        .zip(keep)
        .filter_map(|(locus, keep)| if keep { Some(locus) } else { None })
        .collect()
}
