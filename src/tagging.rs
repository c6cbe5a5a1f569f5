// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::str::FromStr;

use anyhow::Result;
use derive_builder::Builder;
use strum_macros::EnumString;

use crate::binning::multi::{binner_vector, subset_tags, tag_intersection};
use crate::binning::{
    bin_qualifier, binner, build_binsets, BinResult, ResultDisposition, TagCount,
};
use crate::cli::Tagzilla;
use crate::errors::Error;
use crate::filtration::{
    filter_loci_by_completion, filter_loci_by_hwp, filter_loci_by_inclusion, filter_loci_by_maf,
    filter_loci_by_range, filter_loci_ldsubset, GenomicRanges,
};
use crate::io;
use crate::model::{merge_loci, merge_multi_loci, sort_loci, update_locus_map, Includes, Locus};
use crate::output::{
    BinInfo, BinInfoSink, LocusOutput, LocusSink, NullBinInfo, NullLocusSink,
    NullPairwiseBinSink, PairwiseBinOutput, PairwiseBinSink,
};
use crate::scan::{scan_ldpairs, scan_ldpairs_multi, LdPair};
use crate::selection::TagSelector;

/// Multi-population composition policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MultiMethod {
    Merge2,
    Merge3,
    MinLd,
    Global,
}

/// Population labels: unset means one unlabeled population, an integer
/// means that many numbered populations, anything else is a comma
/// separated label list.
pub fn get_populations(spec: &Option<String>) -> Vec<String> {
    let labels = match spec {
        None => Vec::new(),
        Some(s) => match s.parse::<usize>() {
            Ok(n) => (1..=n).map(|i| i.to_string()).collect(),
            Err(_) => s
                .split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_owned)
                .collect(),
        },
    };

    if labels.is_empty() {
        vec![String::new()]
    } else {
        labels
    }
}

/// The LD pairs and loci of one analysis region.
struct Region {
    pairs: Vec<LdPair>,
    locusmap: BTreeMap<String, Locus>,
}

/// Per-population pairs and loci of one region under the global policy.
struct MultiRegion {
    pairs: Vec<Vec<LdPair>>,
    locusmaps: Vec<BTreeMap<String, Locus>>,
}

/// The tag selection driver: loads and filters loci, generates LD pairs,
/// runs the binner under the configured policy and routes emissions to the
/// output sinks.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct Tagger {
    options: Tagzilla,
    includes: Includes,
    exclude: BTreeSet<String>,
    subset: BTreeSet<String>,
    ldsubset: BTreeSet<String>,
    designscores: BTreeMap<String, f64>,
    selector: TagSelector,
}

impl Tagger {
    pub fn run(self) -> Result<()> {
        let populations = get_populations(&self.options.multipopulation);

        if populations.len() > 1 {
            let method = self.options.multimethod.to_lowercase();
            if method.is_empty() {
                return Err(Error::MissingMultiMethod.into());
            }
            let method = MultiMethod::from_str(&method).map_err(|_| {
                Error::UnknownMultiMethod {
                    name: self.options.multimethod.clone(),
                }
            })?;

            if self.options.format != "raw" {
                return Err(Error::LdInputMultipop.into());
            }
            if self.options.genofiles.len() % populations.len() != 0 {
                return Err(Error::InputCountMismatch.into());
            }

            if method == MultiMethod::Global {
                return self.run_global(&populations);
            }
            return self.run_single(&populations, Some(method));
        }

        self.run_single(&populations, None)
    }

    fn maxdist(&self) -> u64 {
        self.options.maxdist * 1000
    }

    fn tag_count(&self) -> TagCount {
        if let Some(per) = self.options.locipertag {
            TagCount::LociPerTag(per)
        } else if let Some(base) = self.options.loglocipertag {
            TagCount::LogLociPerTag(base)
        } else {
            TagCount::Single
        }
    }

    /// Apply the configured locus filters (MAF, subset, range, completion,
    /// HWP), in the input order.
    fn filter_loci(&self, mut loci: Vec<Locus>) -> Result<Vec<Locus>> {
        let minmaf = self.options.maf;
        let minobmaf = self.options.obmaf.unwrap_or(minmaf);
        if minmaf > 0. || minobmaf > 0. {
            loci = filter_loci_by_maf(loci, minmaf, minobmaf, &self.includes);
        }

        if !self.subset.is_empty() {
            loci = filter_loci_by_inclusion(loci, &self.subset);
        }

        if let Some(spec) = &self.options.range {
            let ranges: GenomicRanges = spec.parse().map_err(anyhow::Error::from)?;
            loci = filter_loci_by_range(loci, &ranges);
        }

        if self.options.mincompletion > 0 || self.options.mincompletionrate > 0. {
            loci = filter_loci_by_completion(
                loci,
                self.options.mincompletion,
                self.options.mincompletionrate / 100.,
            );
        }

        if let Some(pvalue) = self.options.hwp {
            loci = filter_loci_by_hwp(loci, pvalue);
        }

        Ok(loci)
    }

    /// Load one genotype file, filtered and location-sorted.
    fn load_loci(&self, path: &str, filtered: bool) -> Result<Vec<Locus>> {
        info!("processing input file {}", path);
        let mut loci = io::load_raw_genotypes(path, self.options.limit)?;
        if filtered {
            loci = self.filter_loci(loci)?;
        }
        sort_loci(&mut loci);
        Ok(loci)
    }

    /// One region per input file: genotype scanning or precomputed pair
    /// loading, depending on the input format.
    fn generate_regions_single(&self) -> Result<Vec<Region>> {
        let mut regions = Vec::new();

        for path in &self.options.genofiles {
            let mut locusmap = BTreeMap::new();
            let pairs = match self.options.format.as_str() {
                "raw" => {
                    let loci = self.load_loci(path, true)?;
                    let loci = filter_loci_ldsubset(loci, &self.ldsubset, self.maxdist());
                    let pairs = scan_ldpairs(
                        &loci,
                        self.maxdist(),
                        self.options.rthreshold,
                        self.options.dthreshold,
                    );
                    update_locus_map(&mut locusmap, loci).map_err(anyhow::Error::from)?;
                    pairs
                }
                "festa" => {
                    info!("processing input file {}", path);
                    io::load_festa_pairs(path, &mut locusmap, &self.subset, self.options.rthreshold)?
                }
                "hapmapld" => {
                    info!("processing input file {}", path);
                    io::load_hapmapld_pairs(
                        path,
                        &mut locusmap,
                        &self.subset,
                        self.maxdist(),
                        self.options.rthreshold,
                        self.options.dthreshold,
                    )?
                }
                other => {
                    return Err(Error::UnknownFormat {
                        name: other.to_owned(),
                    }
                    .into())
                }
            };

            regions.push(Region { pairs, locusmap });
        }

        Ok(regions)
    }

    /// One region per group of `pops` input files, composed under the
    /// merge2/merge3/minld policies into a single pair stream.
    fn generate_regions_multi(&self, pops: usize, method: MultiMethod) -> Result<Vec<Region>> {
        let mut regions = Vec::new();

        for chunk in self.options.genofiles.chunks(pops) {
            let mut multi_loci = Vec::with_capacity(pops);
            let mut locusmap = BTreeMap::new();

            for path in chunk {
                // merge3 defers all filters to the merged sample
                let loci = self.load_loci(path, method != MultiMethod::Merge3)?;
                if method == MultiMethod::MinLd {
                    for locus in &loci {
                        if !locus.genos.is_empty() {
                            locusmap.insert(locus.name.clone(), locus.clone());
                        }
                    }
                }
                multi_loci.push(loci);
            }

            let pairs = match method {
                MultiMethod::MinLd => {
                    let rows = merge_multi_loci(multi_loci);
                    scan_ldpairs_multi(
                        &rows,
                        self.maxdist(),
                        self.options.rthreshold,
                        self.options.dthreshold,
                    )
                }
                MultiMethod::Merge2 | MultiMethod::Merge3 => {
                    let mut merged = merge_loci(multi_loci);
                    if method == MultiMethod::Merge3 {
                        merged = self.filter_loci(merged)?;
                    }
                    for locus in &merged {
                        if !locus.genos.is_empty() {
                            locusmap.insert(locus.name.clone(), locus.clone());
                        }
                    }
                    scan_ldpairs(
                        &merged,
                        self.maxdist(),
                        self.options.rthreshold,
                        self.options.dthreshold,
                    )
                }
                MultiMethod::Global => unreachable!("global method uses its own driver"),
            };

            regions.push(Region { pairs, locusmap });
        }

        Ok(regions)
    }

    fn build_output(
        &self,
    ) -> Result<(
        Box<dyn PairwiseBinSink>,
        Box<dyn LocusSink>,
        Box<dyn BinInfoSink>,
        Box<dyn Write>,
    )> {
        let options = &self.options;

        let stdouts = [
            options.outfile.as_deref(),
            options.locusinfo.as_deref(),
            options.bininfo.as_deref(),
            Some(options.sumfile.as_str()),
        ]
        .iter()
        .filter(|path| **path == Some("-"))
        .count();
        if stdouts > 1 {
            return Err(Error::StdoutConflict.into());
        }

        let pairinfo: Box<dyn PairwiseBinSink> = match &options.outfile {
            Some(path) => Box::new(PairwiseBinOutput::new(
                io::open_output(path)?,
                options.skip,
            )?),
            None => Box::new(NullPairwiseBinSink),
        };

        let locusinfo: Box<dyn LocusSink> = match &options.locusinfo {
            Some(path) => Box::new(LocusOutput::new(io::open_output(path)?)?),
            None => Box::new(NullLocusSink),
        };

        let bininfo: Box<dyn BinInfoSink> = if options.bininfo.is_some()
            || !options.sumfile.is_empty()
        {
            let out = match &options.bininfo {
                Some(path) => Some(io::open_output(path)?),
                None => None,
            };
            Box::new(BinInfo::new(out, options.histomax + 1))
        } else {
            Box::new(NullBinInfo)
        };

        let sumfile = io::open_output(&options.sumfile)?;

        Ok((pairinfo, locusinfo, bininfo, sumfile))
    }

    /// Single-population analysis, including the merge2/merge3/minld
    /// compositions which reduce to one pair stream.
    fn run_single(self, populations: &[String], method: Option<MultiMethod>) -> Result<()> {
        let regions = match method {
            None => self.generate_regions_single()?,
            Some(method) => self.generate_regions_multi(populations.len(), method)?,
        };

        if let Some(path) = &self.options.saveldpairs {
            let all: Vec<Vec<LdPair>> = regions.iter().map(|r| r.pairs.clone()).collect();
            io::write_ldpairs(path, &all)?;
        }
        if self.options.skipbinning {
            return Ok(());
        }

        let (mut pairinfo, mut locusinfo, mut bininfo, mut sumfile) = self.build_output()?;

        let tag_count = self.tag_count();
        let population = populations[0].clone();
        let mut exclude = self.exclude.clone();

        // a total ordering over all regions is required to honor the caps
        let total_order = self.options.targetbins > 0 || self.options.targetloci > 0;
        let batches: Vec<Region> = if total_order {
            info!("building global binsets");
            let mut locusmap = BTreeMap::new();
            let mut pairs = Vec::new();
            for region in regions {
                if method.is_none() {
                    update_locus_map(&mut locusmap, region.locusmap.into_iter().map(|(_, l)| l).collect())
                        .map_err(anyhow::Error::from)?;
                } else {
                    locusmap.extend(region.locusmap);
                }
                pairs.extend(region.pairs);
            }
            vec![Region { pairs, locusmap }]
        } else {
            regions
        };

        let mut binnum = 0usize;
        let mut binned_loci = 0usize;
        let mut tags: BTreeSet<String> = BTreeSet::new();

        for region in batches {
            info!("building binsets");
            let (binsets, mut lddata) = build_binsets(
                &region.locusmap,
                std::slice::from_ref(&region.pairs),
                &self.includes,
                &mut exclude,
                &self.designscores,
            );

            info!("choosing bins");
            let results = binner(
                &region.locusmap,
                binsets,
                &mut lddata,
                &self.includes,
                tag_count,
            );

            for mut bin in results {
                binnum += 1;
                bin.binnum = binnum;

                let qualifier = bin_qualifier(
                    &mut bin,
                    binned_loci,
                    self.options.targetbins,
                    self.options.targetloci,
                );
                binned_loci += bin.len();

                tags.extend(bin.tags.iter().cloned());
                self.selector.select_tags(&mut bin);

                bininfo.emit_bin(&bin, &region.locusmap, &exclude, &population)?;
                pairinfo.emit_bin(&bin, qualifier, &population, &exclude)?;
                locusinfo.emit_bin(&bin, &region.locusmap, qualifier, &population, &exclude)?;
            }

            if self.options.extra {
                pairinfo.emit_extra(&lddata, &tags, &population)?;
            }
        }

        bininfo.emit_summary(&mut sumfile, &population)?;
        Ok(())
    }

    /// Globally synchronized multi-population analysis: one shared priority
    /// queue over all populations, tag sets intersected across populations.
    fn run_global(self, populations: &[String]) -> Result<()> {
        let pops = populations.len();

        let mut regions = Vec::new();
        for chunk in self.options.genofiles.chunks(pops) {
            let mut pairs = Vec::with_capacity(pops);
            let mut locusmaps = Vec::with_capacity(pops);

            for path in chunk {
                let loci = self.load_loci(path, true)?;
                let file_pairs = scan_ldpairs(
                    &loci,
                    self.maxdist(),
                    self.options.rthreshold,
                    self.options.dthreshold,
                );
                let mut map = BTreeMap::new();
                update_locus_map(&mut map, loci).map_err(anyhow::Error::from)?;
                pairs.push(file_pairs);
                locusmaps.push(map);
            }

            regions.push(MultiRegion { pairs, locusmaps });
        }

        let (mut pairinfo, mut locusinfo, mut bininfo, mut sumfile) = self.build_output()?;

        let tag_count = self.tag_count();
        let mut exclude = self.exclude.clone();

        let total_order = self.options.targetbins > 0 || self.options.targetloci > 0;
        let batches: Vec<MultiRegion> = if total_order {
            info!("building global binsets");
            let mut pairs: Vec<Vec<LdPair>> = vec![Vec::new(); pops];
            let mut locusmaps: Vec<BTreeMap<String, Locus>> = vec![BTreeMap::new(); pops];
            for region in regions {
                for (pop, (region_pairs, region_map)) in region
                    .pairs
                    .into_iter()
                    .zip(region.locusmaps)
                    .enumerate()
                {
                    pairs[pop].extend(region_pairs);
                    locusmaps[pop].extend(region_map);
                }
            }
            vec![MultiRegion { pairs, locusmaps }]
        } else {
            regions
        };

        let mut binnum = 0usize;
        let mut binned_loci: BTreeMap<String, usize> = BTreeMap::new();
        let mut poptags: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut popdtags: BTreeMap<ResultDisposition, usize> = BTreeMap::new();

        for region in batches {
            info!("building binsets");
            let mut binsets = Vec::with_capacity(pops);
            let mut lddata = Vec::with_capacity(pops);
            for (pop_pairs, pop_map) in region.pairs.iter().zip(&region.locusmaps) {
                let (pop_binsets, pop_lddata) = build_binsets(
                    pop_map,
                    std::slice::from_ref(pop_pairs),
                    &self.includes,
                    &mut exclude,
                    &self.designscores,
                );
                binsets.push(pop_binsets);
                lddata.push(pop_lddata);
            }

            info!("choosing global bins");
            let emitted = binner_vector(
                &region.locusmaps,
                binsets,
                &mut lddata,
                &self.includes,
                tag_count,
            );

            for (_, mut results) in emitted {
                let shared = tag_intersection(&results);
                // any deterministic element of the intersection will do
                let recommended: Vec<String> =
                    shared.iter().next().cloned().into_iter().collect();

                binnum += 1;
                let mut disposition = None;

                for ((label, bin), locusmap) in populations
                    .iter()
                    .zip(results.iter_mut())
                    .zip(&region.locusmaps)
                {
                    let bin: &mut BinResult = match bin {
                        Some(bin) => bin,
                        None => continue,
                    };

                    bin.binnum = binnum;
                    subset_tags(bin, &shared);

                    let counted = binned_loci.entry(label.clone()).or_insert(0);
                    let qualifier = bin_qualifier(
                        bin,
                        *counted,
                        self.options.targetbins,
                        self.options.targetloci,
                    );
                    *counted += bin.len();

                    poptags
                        .entry(label.clone())
                        .or_insert_with(BTreeSet::new)
                        .extend(bin.tags.iter().cloned());
                    disposition = Some(bin.disposition);

                    bin.recommended_tags = recommended.clone();

                    bininfo.emit_bin(bin, locusmap, &exclude, label)?;
                    pairinfo.emit_bin(bin, qualifier, label, &exclude)?;
                    locusinfo.emit_bin(bin, locusmap, qualifier, label, &exclude)?;
                }

                if let Some(disposition) = disposition {
                    *popdtags.entry(disposition).or_insert(0) += 1;
                }
            }

            if self.options.extra {
                for (pop_lddata, label) in lddata.iter().zip(populations) {
                    let empty = BTreeSet::new();
                    let tags = poptags.get(label).unwrap_or(&empty);
                    pairinfo.emit_extra(pop_lddata, tags, label)?;
                }
            }
        }

        for label in populations {
            bininfo.emit_summary(&mut sumfile, label)?;
        }
        bininfo.emit_multipop_summary(&mut sumfile, &popdtags)?;
        Ok(())
    }
}
