// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::{BTreeMap, BTreeSet};

use ordered_float::NotNan;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::model::{Includes, Locus};
use crate::scan::{LdPair, LdTable};
use crate::EPSILON;

pub mod multi;
pub mod pqueue;

use self::pqueue::PQueue;

/// Candidate bin disposition; the declaration order is the selection
/// priority (obligate untyped first, excluded last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Disposition {
    IncludeUntyped,
    IncludeTyped,
    Normal,
    Exclude,
}

/// Selection key of a candidate bin: disposition, then size descending,
/// then MAF sum descending. Smaller keys win.
pub type BinPriority = (Disposition, i64, NotNan<f64>);

/// The set of loci in sufficient LD with a reference locus, together with
/// the running sum of their MAFs. Mutated destructively by the binner as
/// loci are consumed.
#[derive(Debug, Clone)]
pub struct CandidateBin {
    members: BTreeSet<String>,
    maf_sum: f64,
    pub disposition: Disposition,
    maxcovered: usize,
}

impl CandidateBin {
    pub fn singleton(name: &str, maf: f64) -> Self {
        let mut members = BTreeSet::new();
        members.insert(name.to_owned());
        CandidateBin {
            members,
            maf_sum: maf,
            disposition: Disposition::Normal,
            maxcovered: 1,
        }
    }

    pub fn add(&mut self, name: &str, maf: f64) {
        if self.members.insert(name.to_owned()) {
            self.maf_sum += maf;
            self.maxcovered = self.maxcovered.max(self.members.len());
        }
    }

    pub fn discard(&mut self, name: &str, maf: f64) {
        if self.members.remove(name) {
            self.maf_sum -= maf;
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    pub fn members(&self) -> impl Iterator<Item = &String> {
        self.members.iter()
    }

    pub fn is_superset(&self, other: &CandidateBin) -> bool {
        self.members.is_superset(&other.members)
    }

    pub fn maf_sum(&self) -> f64 {
        self.maf_sum
    }

    pub fn average_maf(&self) -> f64 {
        self.maf_sum / self.members.len() as f64
    }

    pub fn maxcovered(&self) -> usize {
        self.maxcovered
    }

    pub fn priority(&self) -> BinPriority {
        (
            self.disposition,
            -(self.members.len() as i64),
            NotNan::new(-self.maf_sum).unwrap(),
        )
    }
}

pub type Binsets = BTreeMap<String, CandidateBin>;

/// Can `candidate` tag the `reference` bin? It must contain every reference
/// member, and a non-excluded reference may only be covered by non-excluded
/// candidates.
pub fn can_tag(candidate: &CandidateBin, reference: &CandidateBin) -> bool {
    (candidate.disposition != Disposition::Exclude
        || reference.disposition == Disposition::Exclude)
        && candidate.is_superset(reference)
}

/// How many tags a bin of a given size must carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TagCount {
    Single,
    LociPerTag(usize),
    LogLociPerTag(f64),
}

impl TagCount {
    pub fn required(&self, n: usize) -> usize {
        match *self {
            TagCount::Single => 1,
            TagCount::LociPerTag(per) => (n / per + 1).min(n),
            TagCount::LogLociPerTag(base) => {
                (((n + 1) as f64).ln() / base.ln()).ceil() as usize
            }
        }
    }
}

impl Default for TagCount {
    fn default() -> Self {
        TagCount::Single
    }
}

/// Disposition of an emitted bin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumString, IntoStaticStr,
)]
pub enum ResultDisposition {
    #[strum(serialize = "obligate-untyped")]
    ObligateUntyped,
    #[strum(serialize = "obligate-typed")]
    ObligateTyped,
    #[strum(serialize = "maximal-bin")]
    MaximalBin,
    #[strum(serialize = "residual")]
    Residual,
    #[strum(serialize = "obligate-exclude")]
    ObligateExclude,
}

/// Immutable output of the binner for one bin.
#[derive(Debug, Clone)]
pub struct BinResult {
    pub binnum: usize,
    pub tags: Vec<String>,
    pub others: Vec<String>,
    pub tags_required: usize,
    pub average_maf: f64,
    pub include: Option<String>,
    pub include_typed: BTreeSet<String>,
    pub ld: Vec<LdPair>,
    pub disposition: ResultDisposition,
    pub maxcovered: usize,
    pub recommended_tags: Vec<String>,
}

impl BinResult {
    pub fn len(&self) -> usize {
        self.tags.len() + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn loci(&self) -> impl Iterator<Item = &String> {
        self.tags.iter().chain(self.others.iter())
    }

    pub fn is_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t == name)
    }
}

/// Build the initial candidate bins and the LD table from the pair stream.
///
/// Every locus is a member of its own bin; loci never seen in a pair get a
/// singleton bin. Excluded loci (explicit, or with a vanishing design
/// score) are marked EXCLUDE and added to the effective exclude set. Untyped
/// obligates are marked and stripped of any other untyped obligate, so that
/// no untyped obligate can hide inside another's bin; typed obligates are
/// marked without touching membership.
pub fn build_binsets(
    loci: &BTreeMap<String, Locus>,
    ldpairs: &[Vec<LdPair>],
    includes: &Includes,
    exclude: &mut BTreeSet<String>,
    designscores: &BTreeMap<String, f64>,
) -> (Binsets, LdTable) {
    let mut binsets = Binsets::new();
    let mut lddata = LdTable::new();

    let maf = |name: &str| loci.get(name).map_or(0., |l| l.maf);

    for pairs in ldpairs {
        for pair in pairs {
            binsets
                .entry(pair.name1.clone())
                .or_insert_with(|| CandidateBin::singleton(&pair.name1, maf(&pair.name1)));
            binsets
                .entry(pair.name2.clone())
                .or_insert_with(|| CandidateBin::singleton(&pair.name2, maf(&pair.name2)));

            lddata.insert(&pair.name1, &pair.name2, pair.r2, pair.dprime);
            binsets
                .get_mut(&pair.name1)
                .unwrap()
                .add(&pair.name2, maf(&pair.name2));
            binsets
                .get_mut(&pair.name2)
                .unwrap()
                .add(&pair.name1, maf(&pair.name1));
        }
    }

    // singletons for loci that never appeared in a pair
    for (name, locus) in loci {
        binsets
            .entry(name.clone())
            .or_insert_with(|| CandidateBin::singleton(name, locus.maf));
    }

    for name in exclude.iter() {
        if let Some(bin) = binsets.get_mut(name) {
            bin.disposition = Disposition::Exclude;
        }
    }

    if !designscores.is_empty() {
        for (name, bin) in binsets.iter_mut() {
            if designscores.get(name).copied().unwrap_or(0.) < EPSILON {
                bin.disposition = Disposition::Exclude;
                exclude.insert(name.clone());
            }
        }
    }

    for name in includes.untyped() {
        let overlap: Vec<String> = match binsets.get_mut(name) {
            Some(bin) => {
                bin.disposition = Disposition::IncludeUntyped;
                bin.members()
                    .filter(|member| {
                        member.as_str() != name.as_str()
                            && includes.untyped().contains(member.as_str())
                    })
                    .cloned()
                    .collect()
            }
            None => continue,
        };
        for other in overlap {
            let other_maf = maf(&other);
            if let Some(bin) = binsets.get_mut(name) {
                bin.discard(&other, other_maf);
            }
        }
    }

    for name in includes.typed() {
        if let Some(bin) = binsets.get_mut(name) {
            bin.disposition = Disposition::IncludeTyped;
        }
    }

    (binsets, lddata)
}

/// Does the bin fall short of its required tag count and need shrinking?
pub fn must_split_bin(bin: &CandidateBin, binsets: &Binsets, tag_count: TagCount) -> bool {
    if tag_count == TagCount::Single {
        return false;
    }

    let required = tag_count.required(bin.len());
    if required == 1 {
        return false;
    }

    let tags = bin
        .members()
        .filter(|name| binsets.get(*name).map_or(false, |b| can_tag(b, bin)))
        .count();

    tags < required && required <= bin.len()
}

/// Pick the member to withdraw from a bin that cannot muster its required
/// tags: smallest `(-covered, r2, name)`, i.e. the member with the most
/// alternatives, breaking ties by weakest LD to the reference, then name.
pub(crate) fn split_victim(ref_name: &str, binsets: &Binsets, lddata: &LdTable) -> Option<String> {
    let reference = &binsets[ref_name];

    reference
        .members()
        .filter(|name| name.as_str() != ref_name)
        .map(|name| {
            let covered = binsets.get(name).map_or(0, |b| b.len()) as i64;
            let (r2, _) = lddata.get(ref_name, name).unwrap_or((0., 0.));
            ((-covered, NotNan::new(r2).unwrap(), name.clone()), name.clone())
        })
        .min_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, name)| name)
}

/// The priority-driven bin selection sequence. Each step yields the best
/// reference bin together with the (pre-withdrawal) candidate bins of its
/// members, and withdraws the members from every other bin.
pub struct BinSequence<'a> {
    loci: &'a BTreeMap<String, Locus>,
    binsets: Binsets,
    tag_count: TagCount,
    pq: PQueue<String, BinPriority>,
}

impl<'a> BinSequence<'a> {
    pub fn new(loci: &'a BTreeMap<String, Locus>, binsets: Binsets, tag_count: TagCount) -> Self {
        let mut pq = PQueue::new();
        for (name, bin) in &binsets {
            pq.push(name.clone(), bin.priority());
        }
        BinSequence {
            loci,
            binsets,
            tag_count,
            pq,
        }
    }

    fn maf(&self, name: &str) -> f64 {
        self.loci.get(name).map_or(0., |l| l.maf)
    }

    fn peek(&self) -> String {
        let (_, name) = self.pq.peek().expect("queue exhausted before binsets");
        name.clone()
    }

    fn pop_bin(&mut self, name: &str) -> CandidateBin {
        self.pq.remove(&name.to_owned());
        self.binsets
            .remove(name)
            .expect("candidate bin missing for queued locus")
    }

    fn reduce_bin(&mut self, owner: &str, taken: &str, maf: f64) {
        if let Some(bin) = self.binsets.get_mut(owner) {
            bin.discard(taken, maf);
            let priority = bin.priority();
            self.pq.push(owner.to_owned(), priority);
        }
    }

    fn split_bin(&mut self, ref_name: &str, lddata: &LdTable) {
        if let Some(victim) = split_victim(ref_name, &self.binsets, lddata) {
            let victim_maf = self.maf(&victim);
            let ref_maf = self.maf(ref_name);
            self.reduce_bin(ref_name, &victim, victim_maf);
            self.reduce_bin(&victim, ref_name, ref_maf);
        }
    }

    /// Select the next reference bin, shrinking bins that cannot satisfy the
    /// tag count rule, and withdraw its members everywhere.
    pub fn pop(
        &mut self,
        lddata: &LdTable,
    ) -> Option<(String, CandidateBin, BTreeMap<String, CandidateBin>)> {
        if self.binsets.is_empty() {
            return None;
        }

        let ref_name = loop {
            let name = self.peek();
            if !must_split_bin(&self.binsets[&name], &self.binsets, self.tag_count) {
                break name;
            }
            self.split_bin(&name, lddata);
        };

        let largest = self.binsets[&ref_name].clone();

        let mut bins = BTreeMap::new();
        for member in largest.members().cloned().collect::<Vec<_>>() {
            let bin = self.pop_bin(&member);
            let member_maf = self.maf(&member);
            for other in bin.members().cloned().collect::<Vec<_>>() {
                if !largest.contains(&other) {
                    self.reduce_bin(&other, &member, member_maf);
                }
            }
            bins.insert(member, bin);
        }

        Some((ref_name, largest, bins))
    }
}

/// Assemble the emitted record for a selected bin: tags are the members
/// whose own candidate bins cover the reference, the intra-bin LD is
/// consumed from the table, and `maxcovered` reflects the best candidate
/// coverage (reference only, for obligate bins).
pub fn build_result(
    ref_name: &str,
    largest: &CandidateBin,
    bins: &BTreeMap<String, CandidateBin>,
    lddata: &mut LdTable,
    includes: &Includes,
    tag_count: TagCount,
) -> BinResult {
    let tags_required = tag_count.required(largest.len());

    let include_typed: BTreeSet<String> = includes
        .typed()
        .iter()
        .filter(|name| largest.contains(name.as_str()))
        .cloned()
        .collect();

    let obligate = matches!(
        largest.disposition,
        Disposition::IncludeUntyped | Disposition::IncludeTyped
    );

    let disposition = match largest.disposition {
        Disposition::IncludeUntyped => ResultDisposition::ObligateUntyped,
        Disposition::IncludeTyped => ResultDisposition::ObligateTyped,
        Disposition::Exclude => ResultDisposition::ObligateExclude,
        Disposition::Normal => ResultDisposition::MaximalBin,
    };

    let mut maxcovered = largest.maxcovered();
    let mut tags = Vec::new();
    let mut others = Vec::new();

    for (name, bin) in bins {
        if can_tag(bin, largest) {
            tags.push(name.clone());
            if !obligate {
                maxcovered = maxcovered.max(bin.maxcovered());
            }
        } else {
            others.push(name.clone());
        }
    }

    assert!(tags.len() >= tags_required);

    let mut ld: Vec<LdPair> = tags
        .iter()
        .map(|name| LdPair::new(name.clone(), name.clone(), 1., 1.))
        .collect();

    let members: Vec<&String> = largest.members().collect();
    let mut intra = Vec::new();
    for i in 0..members.len() {
        for j in 0..i {
            if let Some((name1, name2, r2, dprime)) = lddata.take(members[i], members[j]) {
                intra.push(LdPair::new(name1, name2, r2, dprime));
            }
        }
    }
    // deterministic order: strongest LD first, names as tie break
    intra.sort_by(|a, b| {
        (NotNan::new(-a.r2).unwrap(), &a.name1, &a.name2)
            .cmp(&(NotNan::new(-b.r2).unwrap(), &b.name1, &b.name2))
    });
    ld.extend(intra);

    BinResult {
        binnum: 0,
        tags,
        others,
        tags_required,
        average_maf: largest.average_maf(),
        include: if obligate {
            Some(ref_name.to_owned())
        } else {
            None
        },
        include_typed,
        ld,
        disposition,
        maxcovered,
        recommended_tags: Vec::new(),
    }
}

/// Greedy maximal binning: repeatedly select the best candidate bin, emit
/// it, and withdraw its members from all other candidate bins. Emission
/// order follows the priority of §`CandidateBin::priority`.
pub fn binner(
    loci: &BTreeMap<String, Locus>,
    binsets: Binsets,
    lddata: &mut LdTable,
    includes: &Includes,
    tag_count: TagCount,
) -> Vec<BinResult> {
    let mut sequence = BinSequence::new(loci, binsets, tag_count);
    let mut results = Vec::new();

    while let Some((ref_name, largest, bins)) = sequence.pop(lddata) {
        results.push(build_result(
            &ref_name, &largest, &bins, lddata, includes, tag_count,
        ));
    }

    results
}

/// Downgrade emissions past the configured caps to residual, and name the
/// qualifier appended to their serialized dispositions. `binned_loci` is
/// the count of loci binned before this bin.
pub fn bin_qualifier(
    bin: &mut BinResult,
    binned_loci: usize,
    targetbins: usize,
    targetloci: usize,
) -> Option<&'static str> {
    let over_target = (targetbins > 0 && bin.binnum > targetbins)
        || (targetloci > 0 && binned_loci > targetloci);

    if over_target && bin.disposition != ResultDisposition::ObligateExclude {
        bin.disposition = ResultDisposition::Residual;
        Some("residual")
    } else {
        match bin.disposition {
            ResultDisposition::ObligateExclude => Some("excluded"),
            ResultDisposition::ObligateTyped => Some("typed_bin"),
            ResultDisposition::ObligateUntyped => Some("untyped_bin"),
            _ => None,
        }
    }
}
