// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;

use derive_new::new;

use crate::model::ld::{bound_r2, count_haplotypes, estimate_ld, HaplotypeCounts};
use crate::model::Locus;
use crate::Error;

/// Tolerance for declaring an LD estimate numerically invalid.
const LD_TOLERANCE: f64 = 1e-6;

/// One locus pair meeting the LD thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, new)]
pub struct LdPair {
    #[serde(rename = "LNAME1")]
    pub name1: String,
    #[serde(rename = "LNAME2")]
    pub name2: String,
    #[serde(rename = "RSQUARED")]
    pub r2: f64,
    #[serde(rename = "DPRIME")]
    pub dprime: f64,
}

/// Symmetric store of pairwise LD, keyed by unordered locus name pairs.
/// Only pairs that passed the distance and threshold filters are inserted.
#[derive(Debug, Default)]
pub struct LdTable {
    pairs: HashMap<(String, String), (f64, f64)>,
}

impl LdTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, name1: &str, name2: &str, r2: f64, dprime: f64) {
        self.pairs
            .insert((name1.to_owned(), name2.to_owned()), (r2, dprime));
    }

    pub fn get(&self, name1: &str, name2: &str) -> Option<(f64, f64)> {
        let key = (name1.to_owned(), name2.to_owned());
        if let Some(&ld) = self.pairs.get(&key) {
            return Some(ld);
        }
        self.pairs.get(&(key.1, key.0)).copied()
    }

    /// Remove and return a pair, in either orientation. The returned names
    /// are in stored orientation.
    pub fn take(&mut self, name1: &str, name2: &str) -> Option<(String, String, f64, f64)> {
        let key = (name1.to_owned(), name2.to_owned());
        if let Some((r2, dprime)) = self.pairs.remove(&key) {
            return Some((key.0, key.1, r2, dprime));
        }
        let key = (key.1, key.0);
        self.pairs
            .remove(&key)
            .map(|(r2, dprime)| (key.0, key.1, r2, dprime))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Remaining pairs in deterministic (name1, name2) order.
    pub fn sorted_pairs(&self) -> Vec<LdPair> {
        let mut pairs: Vec<LdPair> = self
            .pairs
            .iter()
            .map(|((n1, n2), &(r2, dprime))| LdPair::new(n1.clone(), n2.clone(), r2, dprime))
            .collect();
        pairs.sort_by(|a, b| (&a.name1, &a.name2).cmp(&(&b.name1, &b.name2)));
        pairs
    }
}

fn checked_estimate(name1: &str, name2: &str, counts: HaplotypeCounts) -> Option<(f64, f64)> {
    let (r2, dprime) = estimate_ld(counts);

    if r2 < -LD_TOLERANCE
        || r2 > 1. + LD_TOLERANCE
        || dprime < -1. - LD_TOLERANCE
        || dprime > 1. + LD_TOLERANCE
    {
        let err = Error::InvalidLdEstimate {
            name1: name1.to_owned(),
            name2: name2.to_owned(),
            r2,
            dprime,
        };
        warn!("dropping pair: {}", err);
        return None;
    }

    Some((r2, dprime))
}

/// Scan a location-sorted locus list for pairs within `maxdist` base pairs
/// whose LD meets both thresholds. Pairs are emitted in deterministic
/// (i, j) order.
pub fn scan_ldpairs(
    loci: &[Locus],
    maxdist: u64,
    rthreshold: f64,
    dthreshold: f64,
) -> Vec<LdPair> {
    let mut pairs = Vec::new();
    let n = loci.len();

    for i in 0..n {
        let locus1 = &loci[i];

        for locus2 in &loci[i + 1..n] {
            if locus2.location - locus1.location > maxdist {
                break;
            }

            let counts = count_haplotypes(&locus1.genos, &locus2.genos);

            // cheap upper bound on r2 saves the EM for hopeless pairs
            if bound_r2(counts) < rthreshold {
                continue;
            }

            if let Some((r2, dprime)) = checked_estimate(&locus1.name, &locus2.name, counts) {
                if r2 >= rthreshold && dprime.abs() >= dthreshold {
                    pairs.push(LdPair::new(
                        locus1.name.clone(),
                        locus2.name.clone(),
                        r2,
                        dprime,
                    ));
                }
            }
        }
    }

    pairs
}

/// Joint window scan over several populations (the `minld` policy).
///
/// `rows` is the (location, name)-aligned locus matrix of
/// [`crate::model::merge_multi_loci`]: one row per locus, one column per
/// population, gaps as genotype-less placeholders. Populations without
/// genotypes for both loci abstain; all others must meet the thresholds, and
/// the emitted r² and D′ are the minima over the non-abstaining populations.
pub fn scan_ldpairs_multi(
    rows: &[Vec<Locus>],
    maxdist: u64,
    rthreshold: f64,
    dthreshold: f64,
) -> Vec<LdPair> {
    let mut pairs = Vec::new();
    let n = rows.len();

    for i in 0..n {
        let location1 = rows[i][0].location;

        for j in i + 1..n {
            if rows[j][0].location - location1 > maxdist {
                break;
            }

            let mut r2 = f64::INFINITY;
            let mut dprime = f64::INFINITY;
            let mut informative = false;
            let mut good = true;

            for (locus1, locus2) in rows[i].iter().zip(&rows[j]) {
                if locus1.genos.is_empty() || locus2.genos.is_empty() {
                    continue;
                }

                let counts = count_haplotypes(&locus1.genos, &locus2.genos);
                let estimate = match checked_estimate(&locus1.name, &locus2.name, counts) {
                    Some(estimate) => estimate,
                    None => {
                        good = false;
                        break;
                    }
                };
                let (r2_pop, dprime_pop) = estimate;

                informative = true;
                r2 = r2.min(r2_pop);
                dprime = dprime.min(dprime_pop);

                if r2_pop < rthreshold || dprime_pop.abs() < dthreshold {
                    good = false;
                    break;
                }
            }

            if informative && good {
                pairs.push(LdPair::new(
                    rows[i][0].name.clone(),
                    rows[j][0].name.clone(),
                    r2,
                    dprime,
                ));
            }
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{merge_multi_loci, Genotype};

    fn locus(name: &str, location: u64, spec: &str) -> Locus {
        let genos = spec
            .split(',')
            .map(|t| Genotype::parse(t).unwrap())
            .collect();
        Locus::new(name.to_owned(), location, genos).unwrap()
    }

    #[test]
    fn test_scan_respects_maxdist() {
        let loci = vec![
            locus("a", 1_000, "AA,AG,GG,AA"),
            locus("b", 11_000, "CC,CT,TT,CC"),
            locus("c", 2_000_000, "CC,CT,TT,CC"),
        ];
        let pairs = scan_ldpairs(&loci, 200_000, 0.8, 0.);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].name1, "a");
        assert_eq!(pairs[0].name2, "b");
        assert!(pairs[0].r2 > 0.99);
    }

    #[test]
    fn test_scan_threshold() {
        // weakly associated pair stays out at a high threshold
        let loci = vec![
            locus("a", 1_000, "AA,AG,GG,AA,GG,AG,AA,GG"),
            locus("b", 2_000, "CC,CC,CT,CT,TT,TT,CC,CT"),
        ];
        assert!(scan_ldpairs(&loci, 200_000, 0.8, 0.).is_empty());
    }

    #[test]
    fn test_monomorphic_never_pairs() {
        let loci = vec![
            locus("mono", 1_000, "AA,AA,AA,AA"),
            locus("poly", 2_000, "CC,CT,TT,CC"),
        ];
        assert_eq!(
            estimate_ld(count_haplotypes(&loci[0].genos, &loci[1].genos)),
            (0., 0.)
        );
        assert!(scan_ldpairs(&loci, 200_000, 0.8, 0.).is_empty());
    }

    #[test]
    fn test_minld_takes_minimum_and_vetoes() {
        let pop1 = vec![
            locus("a", 1_000, "AA,AG,GG,AA,GG"),
            locus("b", 2_000, "CC,CT,TT,CC,TT"),
        ];
        // same loci, weaker association in the second population
        let pop2 = vec![
            locus("a", 1_000, "AA,AG,GG,AA,GG,AA,AA,GG"),
            locus("b", 2_000, "CC,CC,TT,CT,TT,TT,CC,CT"),
        ];

        let rows = merge_multi_loci(vec![pop1.clone(), pop2.clone()]);

        // with a permissive threshold the pair carries the weaker population's LD
        let pairs = scan_ldpairs_multi(&rows, 200_000, 0., 0.);
        assert_eq!(pairs.len(), 1);
        let solo = scan_ldpairs(&pop2, 200_000, 0., 0.);
        assert_relative_eq!(pairs[0].r2, solo[0].r2, epsilon = 1e-9);

        // with a strict threshold the weaker population vetoes the pair
        let pairs = scan_ldpairs_multi(&rows, 200_000, 0.8, 0.);
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_ldtable_symmetric() {
        let mut table = LdTable::new();
        table.insert("a", "b", 0.9, 1.);
        assert_eq!(table.get("b", "a"), Some((0.9, 1.)));
        let (n1, n2, r2, _) = table.take("b", "a").unwrap();
        assert_eq!((n1.as_str(), n2.as_str()), ("a", "b"));
        assert_relative_eq!(r2, 0.9);
        assert!(table.is_empty());
    }
}
