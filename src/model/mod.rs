// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use counter::Counter;
use getset::Getters;
use itertools::Itertools;

use crate::errors::Error;

pub mod hwp;
pub mod ld;

/// Allele code for a missing observation.
pub const MISSING_ALLELE: u8 = b' ';

/// An unordered pair of allele symbols at one marker for one sample.
///
/// Alleles are single ASCII symbols; the pair is stored sorted so that
/// genotypes compare and hash independently of input order. A genotype with
/// one missing allele keeps the known allele; a fully missing genotype is
/// two missing alleles.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Genotype(u8, u8);

impl Genotype {
    pub const MISSING: Genotype = Genotype(MISSING_ALLELE, MISSING_ALLELE);

    pub fn new(a: u8, b: u8) -> Self {
        if a <= b {
            Genotype(a, b)
        } else {
            Genotype(b, a)
        }
    }

    /// Parse a genotype token: empty means missing, otherwise exactly two
    /// allele symbols. `N` and `0` are missing-allele codes.
    pub fn parse(token: &str) -> Option<Genotype> {
        let token = token.trim();
        if token.is_empty() {
            return Some(Genotype::MISSING);
        }
        let bytes = token.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let normalize = |a: u8| match a {
            b'N' | b'0' => MISSING_ALLELE,
            a => a,
        };
        Some(Genotype::new(normalize(bytes[0]), normalize(bytes[1])))
    }

    pub fn alleles(&self) -> (u8, u8) {
        (self.0, self.1)
    }

    pub fn is_missing(&self) -> bool {
        self.0 == MISSING_ALLELE && self.1 == MISSING_ALLELE
    }

    pub fn has_missing(&self) -> bool {
        self.0 == MISSING_ALLELE || self.1 == MISSING_ALLELE
    }

    pub fn is_het(&self) -> bool {
        !self.has_missing() && self.0 != self.1
    }
}

impl fmt::Debug for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.0 as char, self.1 as char)
    }
}

/// One marker: name, base pair location, minor allele frequency and the
/// per-sample genotype vector. Immutable after construction.
#[derive(Clone, Debug)]
pub struct Locus {
    pub name: String,
    pub location: u64,
    pub maf: f64,
    pub genos: Vec<Genotype>,
}

impl Locus {
    pub fn new(name: String, location: u64, genos: Vec<Genotype>) -> Result<Self, Error> {
        let maf = estimate_maf(&name, &genos)?;
        Ok(Locus {
            name,
            location,
            maf,
            genos,
        })
    }

    /// A locus known only by name and location, e.g. from pairwise LD input
    /// or as a gap filler when aligning populations.
    pub fn placeholder(name: String, location: u64) -> Self {
        Locus {
            name,
            location,
            maf: 0.,
            genos: Vec::new(),
        }
    }
}

/// Estimate the minor allele frequency from a genotype vector.
///
/// Missing alleles do not count; more than two distinct alleles is a fatal
/// error, fewer than two yields zero.
pub fn estimate_maf(name: &str, genos: &[Genotype]) -> Result<f64, Error> {
    let counts: Counter<u8> = genos
        .iter()
        .flat_map(|g| {
            let (a, b) = g.alleles();
            vec![a, b]
        })
        .filter(|&a| a != MISSING_ALLELE)
        .collect();

    if counts.len() > 2 {
        return Err(Error::TooManyAlleles {
            name: name.to_owned(),
        });
    }
    if counts.len() < 2 {
        return Ok(0.);
    }
    let n: usize = counts.values().sum();
    let minor = counts.values().min().unwrap();
    Ok(*minor as f64 / n as f64)
}

/// Sort loci by (location, name), the order the pair scanner requires.
pub fn sort_loci(loci: &mut Vec<Locus>) {
    loci.sort_by(|a, b| (a.location, &a.name).cmp(&(b.location, &b.name)));
}

/// Register loci under their names, refusing overlap between input files.
pub fn update_locus_map(
    locusmap: &mut BTreeMap<String, Locus>,
    loci: Vec<Locus>,
) -> Result<(), Error> {
    if loci.iter().any(|l| locusmap.contains_key(&l.name)) {
        return Err(Error::OverlappingLoci);
    }
    locusmap.extend(loci.into_iter().map(|l| (l.name.clone(), l)));
    Ok(())
}

/// Obligate tag sets. Untyped obligates take precedence: a locus listed as
/// both is treated as untyped only.
#[derive(Debug, Default, Clone, Getters)]
#[get = "pub"]
pub struct Includes {
    typed: BTreeSet<String>,
    untyped: BTreeSet<String>,
}

impl Includes {
    pub fn new(typed: BTreeSet<String>, untyped: BTreeSet<String>) -> Self {
        let typed = typed.difference(&untyped).cloned().collect();
        Includes { typed, untyped }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.typed.contains(name) || self.untyped.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.typed.is_empty() && self.untyped.is_empty()
    }
}

/// Align location-sorted per-population locus streams by (location, name).
/// Every yielded row has one entry per population; populations that do not
/// carry the locus contribute an empty placeholder.
pub fn merge_multi_loci(populations: Vec<Vec<Locus>>) -> Vec<Vec<Locus>> {
    let pops = populations.len();
    let mut cursors = vec![0usize; pops];
    let mut rows = Vec::new();

    loop {
        let head = (0..pops)
            .filter_map(|p| {
                populations[p]
                    .get(cursors[p])
                    .map(|l| (l.location, l.name.clone()))
            })
            .min();

        let (location, name) = match head {
            Some(key) => key,
            None => break,
        };

        let mut row = Vec::with_capacity(pops);
        for p in 0..pops {
            match populations[p].get(cursors[p]) {
                Some(l) if l.name == name && l.location == location => {
                    row.push(l.clone());
                    cursors[p] += 1;
                }
                _ => row.push(Locus::placeholder(name.clone(), location)),
            }
        }
        rows.push(row);
    }

    rows
}

/// Concatenate genotype vectors across populations after aligning by locus.
/// Samples absent from a population are filled with missing genotypes, sized
/// to that population's largest observed sample count. Merged loci with more
/// than two alleles are skipped with a warning.
pub fn merge_loci(populations: Vec<Vec<Locus>>) -> Vec<Locus> {
    let rows = merge_multi_loci(populations);
    if rows.is_empty() {
        return Vec::new();
    }

    let pops = rows[0].len();
    let mut lens = vec![0usize; pops];
    for row in &rows {
        for (len, locus) in lens.iter_mut().zip(row) {
            *len = (*len).max(locus.genos.len());
        }
    }

    let mut merged = Vec::with_capacity(rows.len());
    for row in rows {
        let name = row[0].name.clone();
        let location = row[0].location;
        let genos = row
            .into_iter()
            .zip(&lens)
            .flat_map(|(locus, &len)| {
                let mut genos = locus.genos;
                genos.resize(len, Genotype::MISSING);
                genos
            })
            .collect_vec();

        match Locus::new(name, location, genos) {
            Ok(locus) => merged.push(locus),
            Err(e) => warn!("skipping bad merged locus: {}", e),
        }
    }

    merged
}
