// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use derive_new::new;
use ordered_float::NotNan;
use strum_macros::EnumString;

use crate::binning::{BinResult, ResultDisposition};
use crate::errors::Error;

/// LD-based tag ranking criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Criterion {
    MaxSnp,
    AvgSnp,
    MaxTag,
    AvgTag,
}

impl Criterion {
    /// Neutral element of the criterion's accumulator.
    fn neutral(&self) -> f64 {
        match self {
            Criterion::MaxSnp | Criterion::MaxTag => 1.,
            Criterion::AvgSnp | Criterion::AvgTag => 0.,
        }
    }
}

/// Parse `criterion[:weight]` specs into a criterion weight map. The default
/// weight is 2.
pub fn build_tag_criteria(specs: &[String]) -> Result<BTreeMap<Criterion, f64>, Error> {
    let mut weights = BTreeMap::new();
    for spec in specs {
        let mut parts = spec.split(':');
        let name = parts.next().unwrap_or("").to_lowercase();
        let criterion = Criterion::from_str(&name).map_err(|_| Error::UnknownCriterion {
            name: name.clone(),
        })?;
        let weight = match parts.next() {
            Some(w) => w.parse().map_err(|_| Error::UnknownCriterion {
                name: spec.clone(),
            })?,
            None => TagSelector::DEFAULT_WEIGHT,
        };
        weights.insert(criterion, weight);
    }
    Ok(weights)
}

/// Ranks the tags of an emitted bin by design score and LD-based criteria
/// and chooses the recommended tags.
#[derive(Debug, Default, Clone, new)]
pub struct TagSelector {
    scores: BTreeMap<String, f64>,
    weights: BTreeMap<Criterion, f64>,
}

impl TagSelector {
    pub const DEFAULT_WEIGHT: f64 = 2.;

    /// Reorder `bin.tags` best first and fill `recommended_tags` with the
    /// top `tags_required`, always led by the obligate tag if there is one.
    /// A selector with neither scores nor weights leaves the bin untouched.
    pub fn select_tags(&self, bin: &mut BinResult) {
        if self.weights.is_empty() && self.scores.is_empty() {
            return;
        }

        if self.weights.is_empty() && bin.disposition == ResultDisposition::ObligateExclude {
            return;
        }

        if bin.tags.len() == 1 {
            bin.recommended_tags = bin.tags.clone();
            return;
        }

        let mut combined: BTreeMap<String, f64> = BTreeMap::new();
        for (&criterion, &weight) in &self.weights {
            for (name, w) in self.criterion_weights(bin, criterion, weight) {
                *combined.entry(name).or_insert(1.) *= w;
            }
        }

        // design scores do not apply to bins that may not be tagged at all
        let empty = BTreeMap::new();
        let scores = if bin.disposition == ResultDisposition::ObligateExclude {
            &empty
        } else {
            &self.scores
        };
        let default_score = if scores.is_empty() { 1. } else { 0. };

        let mut ranked: Vec<(NotNan<f64>, String)> = bin
            .tags
            .iter()
            .map(|tag| {
                let score = scores.get(tag).copied().unwrap_or(default_score);
                let weight = combined.get(tag).copied().unwrap_or(1.);
                (NotNan::new(score * weight).unwrap(), tag.clone())
            })
            .collect();
        ranked.sort();
        ranked.reverse();

        bin.tags = ranked.into_iter().map(|(_, tag)| tag).collect();

        bin.recommended_tags = bin.tags.iter().take(bin.tags_required).cloned().collect();
        if let Some(include) = bin.include.clone() {
            if !bin.recommended_tags.contains(&include) {
                let mut recommended = vec![include];
                recommended.extend(
                    bin.recommended_tags
                        .iter()
                        .take(bin.tags_required.saturating_sub(1))
                        .cloned(),
                );
                bin.recommended_tags = recommended;
            }
        }
    }

    /// Per-tag down-weights for one criterion: tags not tied to the best
    /// value of the criterion are scaled by the reciprocal weight.
    fn criterion_weights(
        &self,
        bin: &BinResult,
        criterion: Criterion,
        weight: f64,
    ) -> BTreeMap<String, f64> {
        let tags: BTreeSet<&String> = bin.tags.iter().collect();
        let mut accumulated: BTreeMap<String, f64> = BTreeMap::new();

        for pair in &bin.ld {
            if pair.name1 == pair.name2 {
                continue;
            }
            for &(tag, other) in &[(&pair.name1, &pair.name2), (&pair.name2, &pair.name1)] {
                if !tags.contains(tag) {
                    continue;
                }
                match criterion {
                    Criterion::MaxSnp => {
                        let entry = accumulated.entry(tag.clone()).or_insert(1.);
                        *entry = entry.min(pair.r2);
                    }
                    Criterion::AvgSnp => {
                        *accumulated.entry(tag.clone()).or_insert(0.) += pair.r2;
                    }
                    Criterion::MaxTag => {
                        if !tags.contains(other) {
                            let entry = accumulated.entry(tag.clone()).or_insert(1.);
                            *entry = entry.min(pair.r2);
                        }
                    }
                    Criterion::AvgTag => {
                        if !tags.contains(other) {
                            *accumulated.entry(tag.clone()).or_insert(0.) += pair.r2;
                        }
                    }
                }
            }
        }

        if accumulated.is_empty() {
            return accumulated;
        }

        let best = accumulated
            .values()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);

        let mut weights = BTreeMap::new();
        for tag in &bin.tags {
            let value = accumulated
                .get(tag)
                .copied()
                .unwrap_or_else(|| criterion.neutral());
            if (value - best).abs() > 1e-10 {
                weights.insert(tag.clone(), 1. / weight);
            }
        }
        weights
    }
}
