// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::{BTreeMap, BTreeSet};

use ordered_float::NotNan;

use crate::binning::pqueue::PQueue;
use crate::binning::{
    build_result, must_split_bin, BinResult, Binsets, CandidateBin, Disposition, TagCount,
};
use crate::model::{Includes, Locus};
use crate::scan::LdTable;

/// Selection key of a locus across populations: best in-population
/// disposition, then populations covered, total bin size and total MAF sum,
/// all descending. Loci whose smallest in-population bin is a singleton have
/// coverage and size doubled, dropping ubiquitously lonely markers in
/// priority.
pub type MultiPriority = (Disposition, i64, i64, NotNan<f64>);

/// Globally synchronized bin selection over several populations sharing one
/// priority queue.
pub struct MultiBinSequence<'a> {
    loci: &'a [BTreeMap<String, Locus>],
    binsets: Vec<Binsets>,
    tag_count: TagCount,
    pq: PQueue<String, MultiPriority>,
}

impl<'a> MultiBinSequence<'a> {
    pub fn new(
        loci: &'a [BTreeMap<String, Locus>],
        binsets: Vec<Binsets>,
        tag_count: TagCount,
    ) -> Self {
        let mut sequence = MultiBinSequence {
            loci,
            binsets,
            tag_count,
            pq: PQueue::new(),
        };

        let names: BTreeSet<String> = sequence
            .binsets
            .iter()
            .flat_map(|binsets| binsets.keys().cloned())
            .collect();
        for name in names {
            if let Some(priority) = sequence.priority(&name) {
                sequence.pq.push(name, priority);
            }
        }

        sequence
    }

    fn priority(&self, name: &str) -> Option<MultiPriority> {
        let mut disposition = None;
        let mut pops = 0i64;
        let mut total_len = 0i64;
        let mut total_maf = 0.;
        let mut minlen = usize::max_value();

        for binsets in &self.binsets {
            if let Some(bin) = binsets.get(name) {
                disposition = Some(match disposition {
                    None => bin.disposition,
                    Some(d) if bin.disposition < d => bin.disposition,
                    Some(d) => d,
                });
                minlen = minlen.min(bin.len());
                total_len += bin.len() as i64;
                total_maf += bin.maf_sum();
                pops += 1;
            }
        }

        if minlen == 1 {
            pops *= 2;
            total_len *= 2;
        }

        disposition.map(|d| (d, -pops, -total_len, NotNan::new(-total_maf).unwrap()))
    }

    fn maf(&self, pop: usize, name: &str) -> f64 {
        self.loci[pop].get(name).map_or(0., |l| l.maf)
    }

    fn update_bins<'n>(&mut self, names: impl IntoIterator<Item = &'n String>) {
        for name in names {
            match self.priority(name) {
                Some(priority) => self.pq.push(name.clone(), priority),
                None => {
                    self.pq.remove(name);
                }
            }
        }
    }

    fn split_bin(&mut self, pop: usize, ref_name: &str, lddata: &LdTable) {
        let victim = super::split_victim(ref_name, &self.binsets[pop], lddata);
        if let Some(victim) = victim {
            let victim_maf = self.maf(pop, &victim);
            let ref_maf = self.maf(pop, ref_name);
            if let Some(bin) = self.binsets[pop].get_mut(ref_name) {
                bin.discard(&victim, victim_maf);
            }
            if let Some(bin) = self.binsets[pop].get_mut(&victim) {
                bin.discard(ref_name, ref_maf);
            }
            let touched = vec![ref_name.to_owned(), victim];
            self.update_bins(touched.iter());
        }
    }

    /// Select the next reference locus, shrinking any population bin that
    /// cannot satisfy the tag count rule, and withdraw the members of its
    /// per-population bins everywhere. Every locus whose bin changed is
    /// re-prioritized.
    pub fn pop(
        &mut self,
        lddata: &[LdTable],
    ) -> Option<(
        String,
        Vec<Option<CandidateBin>>,
        Vec<BTreeMap<String, CandidateBin>>,
    )> {
        if !self.binsets.iter().any(|binsets| !binsets.is_empty()) {
            return None;
        }

        let ref_name = loop {
            let (_, name) = self.pq.peek()?;
            let name = name.clone();

            let mut split = None;
            for (pop, binsets) in self.binsets.iter().enumerate() {
                if let Some(bin) = binsets.get(&name) {
                    if must_split_bin(bin, binsets, self.tag_count) {
                        split = Some(pop);
                        break;
                    }
                }
            }

            match split {
                Some(pop) => self.split_bin(pop, &name, &lddata[pop]),
                None => break name,
            }
        };

        let pops = self.binsets.len();
        let mut largest = Vec::with_capacity(pops);
        let mut bins = Vec::with_capacity(pops);
        let mut touched = BTreeSet::new();

        for pop in 0..pops {
            let reference = self.binsets[pop].get(&ref_name).cloned();
            let mut used = BTreeMap::new();

            if let Some(ref reference) = reference {
                touched.extend(reference.members().cloned());
                for member in reference.members().cloned().collect::<Vec<_>>() {
                    let bin = self.binsets[pop]
                        .remove(&member)
                        .expect("candidate bin missing for bin member");
                    let member_maf = self.maf(pop, &member);
                    let outside: Vec<String> = bin
                        .members()
                        .filter(|other| !reference.contains(other.as_str()))
                        .cloned()
                        .collect();
                    for other in outside {
                        if let Some(other_bin) = self.binsets[pop].get_mut(&other) {
                            other_bin.discard(&member, member_maf);
                        }
                        touched.insert(other);
                    }
                    used.insert(member, bin);
                }
            }

            largest.push(reference);
            bins.push(used);
        }

        self.update_bins(touched.iter());
        Some((ref_name, largest, bins))
    }
}

/// Run the globally synchronized binner, emitting one result per population
/// for every selected reference locus (`None` for populations that do not
/// carry it).
pub fn binner_vector(
    loci: &[BTreeMap<String, Locus>],
    binsets: Vec<Binsets>,
    lddata: &mut [LdTable],
    includes: &Includes,
    tag_count: TagCount,
) -> Vec<(String, Vec<Option<BinResult>>)> {
    let mut sequence = MultiBinSequence::new(loci, binsets, tag_count);
    let mut emitted = Vec::new();

    while let Some((ref_name, largest, bins)) = sequence.pop(lddata) {
        let results = largest
            .iter()
            .zip(&bins)
            .zip(lddata.iter_mut())
            .map(|((reference, pop_bins), pop_lddata)| {
                reference.as_ref().map(|reference| {
                    build_result(
                        &ref_name, reference, pop_bins, pop_lddata, includes, tag_count,
                    )
                })
            })
            .collect();
        emitted.push((ref_name, results));
    }

    emitted
}

/// The tags shared by every population's result. Never empty: the reference
/// locus tags itself wherever it occurs.
pub fn tag_intersection(results: &[Option<BinResult>]) -> BTreeSet<String> {
    let mut tags: Option<BTreeSet<String>> = None;

    for result in results.iter().flatten() {
        let result_tags: BTreeSet<String> = result.tags.iter().cloned().collect();
        tags = Some(match tags {
            None => result_tags,
            Some(tags) => tags.intersection(&result_tags).cloned().collect(),
        });
    }

    tags.unwrap_or_default()
}

/// Restrict a result's tags to the cross-population tag set; displaced tags
/// become others.
pub fn subset_tags(result: &mut BinResult, tags: &BTreeSet<String>) {
    let displaced: Vec<String> = result
        .tags
        .iter()
        .filter(|t| !tags.contains(*t))
        .cloned()
        .collect();
    result.tags = tags.iter().cloned().collect();
    result.others.extend(displaced);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::build_binsets;
    use crate::binning::tests::{locus, locus_map};
    use crate::scan::scan_ldpairs;

    fn population(specs: &[(&str, u64, &str)]) -> (BTreeMap<String, Locus>, Binsets, LdTable) {
        let loci: Vec<Locus> = specs
            .iter()
            .map(|(name, location, genos)| locus(name, *location, genos))
            .collect();
        let pairs = scan_ldpairs(&loci, 200_000, 0.8, 0.);
        let map = locus_map(&loci);
        let mut exclude = BTreeSet::new();
        let (binsets, lddata) = build_binsets(
            &map,
            &[pairs],
            &Includes::default(),
            &mut exclude,
            &BTreeMap::new(),
        );
        (map, binsets, lddata)
    }

    #[test]
    fn test_global_binner_intersects_tags() {
        let clique = "AA,AG,GG,AA,AG,GG";
        // population 1 holds a-b-c in one clique; population 2 only a-b
        let (map1, binsets1, ld1) = population(&[
            ("a", 1_000, clique),
            ("b", 1_100, clique),
            ("c", 1_200, clique),
        ]);
        let (map2, binsets2, ld2) =
            population(&[("a", 1_000, clique), ("b", 1_100, clique)]);

        let loci = vec![map1, map2];
        let mut lddata = vec![ld1, ld2];
        let results = binner_vector(
            &loci,
            vec![binsets1, binsets2],
            &mut lddata,
            &Includes::default(),
            TagCount::Single,
        );

        // the a-b-c locus wins first: 2 populations covered, 5 loci total
        let (ref_name, first) = &results[0];
        assert!(["a", "b"].contains(&ref_name.as_str()));
        assert!(first.iter().all(|r| r.is_some()));

        let tags = tag_intersection(first);
        assert!(tags.contains(ref_name));
        // c is only a tag in population 1, so it cannot be shared
        assert!(!tags.contains("c"));
    }

    #[test]
    fn test_singleton_demotion() {
        let clique = "AA,AG,GG,AA,AG,GG";
        // "lonely" is a singleton in both populations; a/b pair up in both
        let (map1, binsets1, _ld1) = population(&[
            ("a", 1_000, clique),
            ("b", 1_100, clique),
            ("lonely", 900_000, clique),
        ]);
        let (map2, binsets2, _ld2) = population(&[
            ("a", 1_000, clique),
            ("b", 1_100, clique),
            ("lonely", 900_000, clique),
        ]);

        let loci = vec![map1, map2];
        let sequence =
            MultiBinSequence::new(&loci, vec![binsets1, binsets2], TagCount::Single);

        let pair_priority = sequence.priority("a").unwrap();
        let lonely_priority = sequence.priority("lonely").unwrap();
        // coverage and size of the ubiquitous singleton are doubled
        assert_eq!(lonely_priority.1, -4);
        assert_eq!(lonely_priority.2, -4);
        assert!(lonely_priority < pair_priority);
    }

    #[test]
    fn test_subset_tags_moves_displaced() {
        let mut result = BinResult {
            binnum: 1,
            tags: vec!["a".into(), "b".into(), "c".into()],
            others: vec!["d".into()],
            tags_required: 1,
            average_maf: 0.3,
            include: None,
            include_typed: BTreeSet::new(),
            ld: Vec::new(),
            disposition: crate::binning::ResultDisposition::MaximalBin,
            maxcovered: 4,
            recommended_tags: Vec::new(),
        };
        let shared: BTreeSet<String> = vec!["a".to_owned()].into_iter().collect();
        subset_tags(&mut result, &shared);
        assert_eq!(result.tags, vec!["a".to_owned()]);
        assert_eq!(result.others.len(), 3);
    }
}
