// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use anyhow::Result;
use itertools::Itertools;
use strum::IntoEnumIterator;
use vec_map::VecMap;

use crate::binning::{BinResult, ResultDisposition};
use crate::model::Locus;
use crate::scan::LdTable;

/// Compact float form: three digit precision, trailing zeros stripped,
/// `0` for exactly zero.
pub fn sfloat(x: f64) -> String {
    if x == 0. {
        return "0".to_owned();
    }
    let s = format!("{:.3}", x);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_owned()
    } else {
        s.to_owned()
    }
}

pub fn percent(a: f64, b: f64) -> f64 {
    if b == 0. {
        0.
    } else {
        a / b * 100.
    }
}

/// Label used for an unlabeled analysis in serialized output.
pub fn display_population(population: &str) -> &str {
    if population.is_empty() {
        "user specified"
    } else {
        population
    }
}

fn median(sorted: &[u64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.
    }
}

fn average(values: &[u64]) -> f64 {
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

/// Disposition label of a tag within its bin.
pub fn tag_disposition(name: &str, bin: &BinResult) -> String {
    let base = match bin.disposition {
        ResultDisposition::ObligateUntyped => {
            if bin.include.as_deref() == Some(name) {
                "untyped-tag"
            } else if bin.include_typed.contains(name) {
                "redundant-tag"
            } else {
                "alternate-tag"
            }
        }
        ResultDisposition::ObligateTyped => {
            if bin.include.as_deref() == Some(name) {
                "typed-tag"
            } else if bin.include_typed.contains(name) {
                "redundant-tag"
            } else {
                "alternate-tag"
            }
        }
        ResultDisposition::ObligateExclude => "excluded-tag",
        _ => {
            if bin.tags.len() > 1 {
                "candidate-tag"
            } else if bin.len() > 1 {
                "necessary-tag"
            } else if bin.maxcovered > 1 {
                "lonely-tag"
            } else {
                "singleton-tag"
            }
        }
    };

    if bin.recommended_tags.iter().any(|t| t == name) {
        format!("{},recommended", base)
    } else {
        base.to_owned()
    }
}

/// Disposition label of any bin member in the locus table.
pub fn locus_disposition(
    name: &str,
    bin: &BinResult,
    exclude: &BTreeSet<String>,
    qualifier: Option<&str>,
) -> String {
    let disposition = if bin.is_tag(name) {
        tag_disposition(name, bin)
    } else if exclude.contains(name) && bin.disposition != ResultDisposition::ObligateExclude {
        "exclude".to_owned()
    } else {
        "other".to_owned()
    };

    match qualifier {
        Some(q) => format!("{},{}", disposition, q),
        None => disposition,
    }
}

/// Disposition label of an intra-bin pair in the pair table.
pub fn pair_disposition(
    name1: &str,
    name2: &str,
    bin: &BinResult,
    qualifier: Option<&str>,
) -> String {
    let disposition = if name1 == name2 {
        tag_disposition(name1, bin)
    } else {
        let label = |name: &str| if bin.is_tag(name) { "tag" } else { "other" };
        format!("{}-{}", label(name1), label(name2))
    };

    match qualifier {
        Some(q) => format!("{},{}", disposition, q),
        None => disposition,
    }
}

/// Sink for the tabular pairwise LD output of each bin.
pub trait PairwiseBinSink {
    fn emit_bin(
        &mut self,
        bin: &BinResult,
        qualifier: Option<&str>,
        population: &str,
        exclude: &BTreeSet<String>,
    ) -> Result<()>;

    /// Residual inter-bin LD, labeled against the accumulated tag set.
    fn emit_extra(
        &mut self,
        lddata: &LdTable,
        tags: &BTreeSet<String>,
        population: &str,
    ) -> Result<()>;
}

pub struct NullPairwiseBinSink;

impl PairwiseBinSink for NullPairwiseBinSink {
    fn emit_bin(
        &mut self,
        _: &BinResult,
        _: Option<&str>,
        _: &str,
        _: &BTreeSet<String>,
    ) -> Result<()> {
        Ok(())
    }

    fn emit_extra(&mut self, _: &LdTable, _: &BTreeSet<String>, _: &str) -> Result<()> {
        Ok(())
    }
}

pub struct PairwiseBinOutput {
    out: Box<dyn Write>,
    skip: bool,
}

impl PairwiseBinOutput {
    pub fn new(mut out: Box<dyn Write>, skip: bool) -> Result<Self> {
        writeln!(out, "BIN\tLNAME1\tLNAME2\tPOPULATION\tRSQUARED\tDPRIME\tDISPOSITION")?;
        Ok(PairwiseBinOutput { out, skip })
    }
}

impl PairwiseBinSink for PairwiseBinOutput {
    fn emit_bin(
        &mut self,
        bin: &BinResult,
        qualifier: Option<&str>,
        population: &str,
        exclude: &BTreeSet<String>,
    ) -> Result<()> {
        let suppressed = matches!(
            bin.disposition,
            ResultDisposition::ObligateExclude | ResultDisposition::Residual
        );

        for pair in &bin.ld {
            if self.skip
                && (suppressed || exclude.contains(&pair.name1) || exclude.contains(&pair.name2))
            {
                continue;
            }
            writeln!(
                self.out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                bin.binnum,
                pair.name1,
                pair.name2,
                display_population(population),
                sfloat(pair.r2),
                sfloat(pair.dprime),
                pair_disposition(&pair.name1, &pair.name2, bin, qualifier)
            )?;
        }
        Ok(())
    }

    fn emit_extra(
        &mut self,
        lddata: &LdTable,
        tags: &BTreeSet<String>,
        population: &str,
    ) -> Result<()> {
        let label = |name: &str| if tags.contains(name) { "tag" } else { "other" };

        for pair in lddata.sorted_pairs() {
            writeln!(
                self.out,
                "\t{}\t{}\t{}\t{}\t{}\t{}-{},interbin",
                pair.name1,
                pair.name2,
                display_population(population),
                sfloat(pair.r2),
                sfloat(pair.dprime),
                label(&pair.name1),
                label(&pair.name2)
            )?;
        }
        Ok(())
    }
}

/// Sink for the per-locus table.
pub trait LocusSink {
    fn emit_bin(
        &mut self,
        bin: &BinResult,
        locusmap: &BTreeMap<String, Locus>,
        qualifier: Option<&str>,
        population: &str,
        exclude: &BTreeSet<String>,
    ) -> Result<()>;
}

pub struct NullLocusSink;

impl LocusSink for NullLocusSink {
    fn emit_bin(
        &mut self,
        _: &BinResult,
        _: &BTreeMap<String, Locus>,
        _: Option<&str>,
        _: &str,
        _: &BTreeSet<String>,
    ) -> Result<()> {
        Ok(())
    }
}

pub struct LocusOutput {
    out: Box<dyn Write>,
}

impl LocusOutput {
    pub fn new(mut out: Box<dyn Write>) -> Result<Self> {
        writeln!(out, "LNAME\tLOCATION\tPOPULATION\tMAF\tBINNUM\tDISPOSITION")?;
        Ok(LocusOutput { out })
    }
}

impl LocusSink for LocusOutput {
    fn emit_bin(
        &mut self,
        bin: &BinResult,
        locusmap: &BTreeMap<String, Locus>,
        qualifier: Option<&str>,
        population: &str,
        exclude: &BTreeSet<String>,
    ) -> Result<()> {
        for name in bin.loci() {
            let locus = &locusmap[name];
            writeln!(
                self.out,
                "{}\t{}\t{}\t{}\t{}\t{}",
                locus.name,
                locus.location,
                display_population(population),
                sfloat(locus.maf),
                bin.binnum,
                locus_disposition(name, bin, exclude, qualifier)
            )?;
        }
        Ok(())
    }
}

/// Aggregated statistics for one class of bins.
#[derive(Debug, Default, Clone)]
pub struct BinStat {
    pub count: usize,
    pub tags_required: usize,
    pub loci: usize,
    pub width: u64,
    pub spacing: f64,
    pub total_tags: usize,
    pub others: usize,
    pub includes: usize,
    pub excludes: usize,
}

impl BinStat {
    #[allow(clippy::too_many_arguments)]
    fn update(
        &mut self,
        required: usize,
        tags: usize,
        others: usize,
        width: u64,
        spacing: f64,
        include: bool,
        excludes: usize,
    ) {
        self.count += 1;
        self.tags_required += required;
        self.loci += tags + others;
        self.width += width;
        self.spacing += spacing;
        self.total_tags += tags;
        self.others += others;
        if include {
            self.includes += 1;
        }
        self.excludes += excludes;
    }

    fn absorb(&mut self, other: &BinStat) {
        self.count += other.count;
        self.tags_required += other.tags_required;
        self.loci += other.loci;
        self.width += other.width;
        self.spacing += other.spacing;
        self.total_tags += other.total_tags;
        self.others += other.others;
        self.includes += other.includes;
        self.excludes += other.excludes;
    }
}

/// Sink for the human readable per-bin report and the summary histograms.
pub trait BinInfoSink {
    fn emit_bin(
        &mut self,
        bin: &BinResult,
        locusmap: &BTreeMap<String, Locus>,
        exclude: &BTreeSet<String>,
        population: &str,
    ) -> Result<()>;

    fn emit_summary(&mut self, out: &mut dyn Write, population: &str) -> Result<()>;

    fn emit_multipop_summary(
        &mut self,
        out: &mut dyn Write,
        tags: &BTreeMap<ResultDisposition, usize>,
    ) -> Result<()>;
}

pub struct NullBinInfo;

impl BinInfoSink for NullBinInfo {
    fn emit_bin(
        &mut self,
        _: &BinResult,
        _: &BTreeMap<String, Locus>,
        _: &BTreeSet<String>,
        _: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn emit_summary(&mut self, _: &mut dyn Write, _: &str) -> Result<()> {
        Ok(())
    }

    fn emit_multipop_summary(
        &mut self,
        _: &mut dyn Write,
        _: &BTreeMap<ResultDisposition, usize>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Collects per-disposition, per-size bin statistics and optionally writes
/// the detailed per-bin report. `histomax` is one past the largest bin size
/// with its own histogram row; larger bins share the overflow row.
pub struct BinInfo {
    out: Option<Box<dyn Write>>,
    stats: BTreeMap<String, BTreeMap<ResultDisposition, VecMap<BinStat>>>,
    histomax: usize,
}

impl BinInfo {
    pub fn new(out: Option<Box<dyn Write>>, histomax: usize) -> Self {
        BinInfo {
            out,
            stats: BTreeMap::new(),
            histomax,
        }
    }

    fn emit_summary_stats(
        &self,
        out: &mut dyn Write,
        stats: &VecMap<BinStat>,
        disposition: ResultDisposition,
        population: &str,
    ) -> Result<()> {
        if population.is_empty() {
            writeln!(out, "\nBin statistics by bin size for {}:\n", disposition)?;
        } else {
            writeln!(
                out,
                "\nBin statistics by bin size for {} in population {}:\n",
                disposition, population
            )?;
        }

        writeln!(out, " bin   tags                                total   non-     avg    avg")?;
        writeln!(out, " size  req.   bins     %    loci      %    tags    tags    tags  width")?;
        writeln!(out, " ----- ------ ------ ------ ------- ------ ------- ------- ---- ------")?;

        let total_bins: usize = stats.values().map(|s| s.count).sum();
        let total_loci: usize = stats.values().map(|s| s.loci).sum();

        let filled: Vec<usize> = stats
            .iter()
            .filter(|(_, s)| s.count > 0)
            .map(|(i, _)| i)
            .collect();
        let empty = BinStat::default();

        if let (Some(&hmin), Some(&hmax)) = (filled.first(), filled.last()) {
            for i in hmin..=hmax {
                let label = if i == 0 {
                    "singl".to_owned()
                } else if i == self.histomax {
                    format!(">{:2}  ", i - 1)
                } else {
                    format!("{:3}  ", i)
                };
                let stat = stats.get(i).unwrap_or(&empty);
                emit_summary_line(out, &label, stat, total_bins, total_loci)?;
            }
        }

        let mut total = BinStat::default();
        for stat in stats.values() {
            total.absorb(stat);
        }
        emit_summary_line(out, "Total", &total, total_bins, total_loci)?;
        writeln!(out)?;
        Ok(())
    }
}

fn emit_summary_line(
    out: &mut dyn Write,
    label: &str,
    stats: &BinStat,
    total_bins: usize,
    total_loci: usize,
) -> Result<()> {
    let n = stats.count;
    let m = stats.loci;
    let (t, w) = if n > 0 {
        (
            stats.total_tags as f64 / n as f64,
            stats.width as f64 / n as f64,
        )
    } else {
        (0., 0.)
    };

    writeln!(
        out,
        " {} {:6} {:6} {:6.2} {:7} {:6.2} {:7} {:7} {:4.1} {:6}",
        label,
        stats.tags_required,
        n,
        percent(n as f64, total_bins as f64),
        m,
        percent(m as f64, total_loci as f64),
        stats.total_tags,
        stats.others,
        t,
        w as u64
    )?;
    Ok(())
}

impl BinInfoSink for BinInfo {
    fn emit_bin(
        &mut self,
        bin: &BinResult,
        locusmap: &BTreeMap<String, Locus>,
        exclude: &BTreeSet<String>,
        population: &str,
    ) -> Result<()> {
        let binsize = bin.len();
        let amaf = bin.average_maf * 100.;

        let mut locations: Vec<u64> = bin.loci().map(|name| locusmap[name].location).collect();
        locations.sort_unstable();
        let mut spacing: Vec<u64> = locations.windows(2).map(|w| w[1] - w[0]).collect();
        spacing.sort_unstable();
        let width = locations[locations.len() - 1] - locations[0];

        let excls: Vec<&String> = bin.loci().filter(|name| exclude.contains(*name)).collect();

        let aspacing = if spacing.len() > 1 {
            average(&spacing)
        } else {
            0.
        };

        let hlen = if bin.maxcovered == 1 {
            0
        } else {
            binsize.min(self.histomax)
        };

        self.stats
            .entry(population.to_owned())
            .or_insert_with(BTreeMap::new)
            .entry(bin.disposition)
            .or_insert_with(VecMap::new)
            .entry(hlen)
            .or_insert_with(BinStat::default)
            .update(
                bin.tags_required,
                bin.tags.len(),
                bin.others.len(),
                width,
                aspacing,
                bin.include.is_some(),
                excls.len(),
            );

        let out = match self.out.as_mut() {
            Some(out) => out,
            None => return Ok(()),
        };

        let population = display_population(population);
        writeln!(
            out,
            "Bin {:<4} population: {}, sites: {}, tags {}, other {}, tags required {}, width {}, avg. MAF {:.1}%",
            bin.binnum, population, binsize, bin.tags.len(), bin.others.len(),
            bin.tags_required, width, amaf
        )?;
        writeln!(
            out,
            "Bin {:<4} Location: min {}, median {}, average {}, max {}",
            bin.binnum,
            locations[0],
            median(&locations) as u64,
            average(&locations) as u64,
            locations[locations.len() - 1]
        )?;
        if spacing.len() > 1 {
            writeln!(
                out,
                "Bin {:<4} Spacing: min {}, median {}, average {}, max {}",
                bin.binnum,
                spacing[0],
                median(&spacing) as u64,
                average(&spacing) as u64,
                spacing[spacing.len() - 1]
            )?;
        }
        writeln!(
            out,
            "Bin {:<4} TagSnps: {}",
            bin.binnum,
            bin.tags.iter().sorted().join(" ")
        )?;
        if !bin.recommended_tags.is_empty() {
            writeln!(
                out,
                "Bin {:<4} RecommendedTags: {}",
                bin.binnum,
                bin.recommended_tags.iter().join(" ")
            )?;
        }
        writeln!(
            out,
            "Bin {:<4} other_snps: {}",
            bin.binnum,
            bin.others.iter().sorted().join(" ")
        )?;

        if let Some(include) = &bin.include {
            let typing = if bin.disposition == ResultDisposition::ObligateUntyped {
                "untyped"
            } else {
                "typed"
            };
            writeln!(out, "Bin {:<4} Obligate_tag: {}, {}", bin.binnum, include, typing)?;
        }

        if !excls.is_empty() {
            writeln!(
                out,
                "Bin {:<4} Excluded_as_tags: {}",
                bin.binnum,
                excls.iter().sorted().join(" ")
            )?;
        }

        writeln!(out, "Bin {:<4} Bin_disposition: {}", bin.binnum, bin.disposition)?;
        writeln!(out, "Bin {:<4} Loci_covered: {}", bin.binnum, bin.maxcovered)?;
        writeln!(out)?;
        Ok(())
    }

    fn emit_summary(&mut self, out: &mut dyn Write, population: &str) -> Result<()> {
        let empty = BTreeMap::new();
        let stats = self.stats.get(population).unwrap_or(&empty);

        let mut tstats: BTreeMap<ResultDisposition, BinStat> = BTreeMap::new();
        for disposition in ResultDisposition::iter() {
            if let Some(by_size) = stats.get(&disposition) {
                self.emit_summary_stats(out, by_size, disposition, population)?;
                let mut total = BinStat::default();
                for stat in by_size.values() {
                    total.absorb(stat);
                }
                tstats.insert(disposition, total);
            }
        }

        if population.is_empty() {
            writeln!(out, "\nBin statistics by disposition:")?;
        } else {
            writeln!(out, "\nBin statistics by disposition for population {}:", population)?;
        }

        writeln!(out, "                      tags                                total   non-     avg    avg")?;
        writeln!(out, " disposition          req.   bins     %    loci      %    tags    tags    tags  width")?;
        writeln!(out, " -------------------- ------ ------ ------ ------- ------ ------- ------- ---- ------")?;

        let total_bins: usize = tstats.values().map(|s| s.count).sum();
        let total_loci: usize = tstats.values().map(|s| s.loci).sum();
        let empty_stat = BinStat::default();

        for disposition in ResultDisposition::iter() {
            let stat = tstats.get(&disposition).unwrap_or(&empty_stat);
            let label = format!("{:<20}", disposition.to_string());
            emit_summary_line(out, &label, stat, total_bins, total_loci)?;
        }

        let mut grand = BinStat::default();
        for stat in tstats.values() {
            grand.absorb(stat);
        }
        emit_summary_line(out, "              Total ", &grand, total_bins, total_loci)?;
        writeln!(out)?;
        out.flush()?;
        Ok(())
    }

    fn emit_multipop_summary(
        &mut self,
        out: &mut dyn Write,
        tags: &BTreeMap<ResultDisposition, usize>,
    ) -> Result<()> {
        let n: usize = tags.values().sum();

        writeln!(out, "\nTags required by disposition for all population:")?;
        writeln!(out, "                      tags         ")?;
        writeln!(out, " disposition          req.     %   ")?;
        writeln!(out, " -------------------- ------ ------")?;

        for disposition in ResultDisposition::iter() {
            let m = tags.get(&disposition).copied().unwrap_or(0);
            writeln!(
                out,
                " {:<20} {:6} {:6.2}",
                disposition.to_string(),
                m,
                percent(m as f64, n as f64)
            )?;
        }

        writeln!(out, "              Total   {:6} {:6.2}\n", n, 100.)?;
        out.flush()?;
        Ok(())
    }
}
