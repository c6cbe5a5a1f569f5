// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

use anyhow::Result;
use regex::Regex;

use crate::errors::Error;
use crate::model::{Genotype, Locus};
use crate::scan::LdPair;

lazy_static! {
    static ref RE_SPACES: Regex = Regex::new(r"[\t ,]+").unwrap();
}

/// Header prefix of the native genotype table format.
pub const GENO_HEADER: &str = "rs#\tchr\tpos\t";

/// Open an input path, `-` meaning standard input.
pub fn open_input(path: &str) -> Result<Box<dyn BufRead>> {
    Ok(if path == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(path)?))
    })
}

/// Open an output path, `-` meaning standard output.
pub fn open_output(path: &str) -> Result<Box<dyn Write>> {
    Ok(if path == "-" {
        Box::new(io::stdout())
    } else {
        Box::new(File::create(path)?)
    })
}

fn display_path(path: &str) -> &str {
    if path == "-" {
        "<stdin>"
    } else {
        path
    }
}

/// Load loci from the native tab separated genotype table: a `rs#\tchr\tpos`
/// header naming the samples, one marker per row. Malformed or
/// non-biallelic rows are skipped with a warning; `limit` truncates the
/// stream (0 for unlimited).
pub fn load_raw_genotypes(path: &str, limit: usize) -> Result<Vec<Locus>> {
    let mut reader = open_input(path)?;

    let mut header = String::new();
    reader.read_line(&mut header)?;
    if !header.starts_with(GENO_HEADER) {
        return Err(Error::UnrecognizedHeader {
            path: display_path(path).to_owned(),
        }
        .into());
    }
    let samples = header.trim_end().split('\t').count() - 3;

    let mut loci = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        if limit > 0 && loci.len() >= limit {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            warn!(
                "skipping malformed record at line {} of {}",
                lineno + 2,
                display_path(path)
            );
            continue;
        }

        let name = fields[0].to_owned();
        let location: u64 = match fields[2].trim().parse() {
            Ok(location) => location,
            Err(_) => {
                warn!(
                    "skipping invalid locus in file '{}', name '{}'",
                    display_path(path),
                    name
                );
                continue;
            }
        };

        let mut genos = Vec::with_capacity(samples);
        let mut bad = false;
        for field in fields.iter().skip(3).take(samples) {
            match Genotype::parse(field) {
                Some(geno) => genos.push(geno),
                None => {
                    bad = true;
                    break;
                }
            }
        }
        if bad {
            warn!(
                "skipping invalid locus in file '{}', name '{}'",
                display_path(path),
                name
            );
            continue;
        }
        genos.resize(samples, Genotype::MISSING);

        match Locus::new(name, location, genos) {
            Ok(locus) => loci.push(locus),
            Err(e) => warn!("skipping invalid locus: {}", e),
        }
    }

    Ok(loci)
}

/// Load FESTA formatted precomputed LD: `LNAME1 LNAME2 LD` records after a
/// header line. Loci are registered as placeholders; only r² is available,
/// D′ is reported as zero.
pub fn load_festa_pairs(
    path: &str,
    locusmap: &mut BTreeMap<String, Locus>,
    subset: &BTreeSet<String>,
    rthreshold: f64,
) -> Result<Vec<LdPair>> {
    let mut reader = open_input(path)?;

    let mut header = String::new();
    reader.read_line(&mut header)?;

    let mut pairs = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let fields: Vec<&str> = RE_SPACES.split(trimmed).collect();
        let (name1, name2, ld) = match fields.as_slice() {
            [name1, name2, ld] => (*name1, *name2, *ld),
            _ => {
                warn!(
                    "skipping malformed record at line {} of {}",
                    lineno + 2,
                    display_path(path)
                );
                continue;
            }
        };

        let ldvalue: f64 = match ld.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    "skipping malformed record at line {} of {}",
                    lineno + 2,
                    display_path(path)
                );
                continue;
            }
        };

        if !subset.is_empty() && (!subset.contains(name1) || !subset.contains(name2)) {
            continue;
        }

        locusmap
            .entry(name1.to_owned())
            .or_insert_with(|| Locus::placeholder(name1.to_owned(), 0));
        locusmap
            .entry(name2.to_owned())
            .or_insert_with(|| Locus::placeholder(name2.to_owned(), 0));

        if ldvalue >= rthreshold {
            pairs.push(LdPair::new(name1.to_owned(), name2.to_owned(), ldvalue, 0.));
        }
    }

    Ok(pairs)
}

/// Load HapMap formatted precomputed LD: space separated
/// `POS1 POS2 POPULATION LNAME1 LNAME2 DPRIME RSQUARED LOD` records,
/// `#` comments allowed. Distance and both thresholds are applied here.
pub fn load_hapmapld_pairs(
    path: &str,
    locusmap: &mut BTreeMap<String, Locus>,
    subset: &BTreeSet<String>,
    maxdist: u64,
    rthreshold: f64,
    dthreshold: f64,
) -> Result<Vec<LdPair>> {
    let reader = open_input(path)?;

    let mut pairs = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = trimmed.split(' ').collect();
        let parsed = if fields.len() == 8 {
            let location1 = fields[0].parse::<u64>();
            let location2 = fields[1].parse::<u64>();
            let dprime = fields[5].parse::<f64>();
            let r2 = fields[6].parse::<f64>();
            match (location1, location2, dprime, r2) {
                (Ok(l1), Ok(l2), Ok(d), Ok(r)) => Some((l1, l2, fields[3], fields[4], d, r)),
                _ => None,
            }
        } else {
            None
        };

        let (location1, location2, name1, name2, dprime, r2) = match parsed {
            Some(parsed) => parsed,
            None => {
                warn!(
                    "skipping malformed record at line {} of {}",
                    lineno + 1,
                    display_path(path)
                );
                continue;
            }
        };

        if !subset.is_empty() && (!subset.contains(name1) || !subset.contains(name2)) {
            continue;
        }

        locusmap
            .entry(name1.to_owned())
            .or_insert_with(|| Locus::placeholder(name1.to_owned(), location1));
        locusmap
            .entry(name2.to_owned())
            .or_insert_with(|| Locus::placeholder(name2.to_owned(), location2));

        if location1.max(location2) - location1.min(location2) > maxdist {
            continue;
        }

        if r2 >= rthreshold && dprime.abs() >= dthreshold {
            pairs.push(LdPair::new(name1.to_owned(), name2.to_owned(), r2, dprime));
        }
    }

    Ok(pairs)
}

/// Read a SNP list into `set`. A spec starting with `:` is an inline comma
/// separated list; anything else is a file with one locus name leading each
/// line.
pub fn read_snp_list(spec: &str, set: &mut BTreeSet<String>) -> Result<()> {
    if let Some(inline) = spec.strip_prefix(':') {
        set.extend(inline.split(',').map(|s| s.trim().to_owned()));
        return Ok(());
    }

    let reader = open_input(spec)?;
    for line in reader.lines() {
        let line = line?;
        if let Some(name) = RE_SPACES.split(line.trim()).next() {
            if !name.is_empty() {
                set.insert(name.to_owned());
            }
        }
    }
    Ok(())
}

/// Read `LNAME SCORE` records, silently skipping lines without a numeric
/// score.
pub fn read_design_scores(path: &str) -> Result<Vec<(String, f64)>> {
    let reader = open_input(path)?;

    let mut scores = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let fields: Vec<&str> = RE_SPACES.split(line.trim()).collect();
        if fields.len() < 2 {
            continue;
        }
        if let Ok(score) = fields[1].parse::<f64>() {
            scores.push((fields[0].to_owned(), score));
        }
    }
    Ok(scores)
}

/// Aggregate design score files given as `FILE[:threshold[:scale]]` specs.
/// Scores below the threshold count as zero; scores for the same locus
/// multiply together after scaling.
pub fn build_design_scores(specs: &[String]) -> Result<BTreeMap<String, f64>> {
    let mut aggregated = BTreeMap::new();

    for spec in specs {
        let mut parts = spec.split(':');
        let path = parts.next().unwrap_or("");
        let threshold: f64 = match parts.next() {
            Some(t) => t.parse().map_err(|_| Error::MalformedRecord {
                path: spec.clone(),
                line: 0,
                msg: "invalid design score threshold".to_owned(),
            })?,
            None => 0.,
        };
        let scale: f64 = match parts.next() {
            Some(s) => s.parse().map_err(|_| Error::MalformedRecord {
                path: spec.clone(),
                line: 0,
                msg: "invalid design score scale".to_owned(),
            })?,
            None => 1.,
        };

        for (name, score) in read_design_scores(path)? {
            let score = if score < threshold { 0. } else { score };
            *aggregated.entry(name).or_insert(1.) *= score * scale;
        }
    }

    Ok(aggregated)
}

/// Write the pairwise LD estimates of all regions as a tab separated table.
pub fn write_ldpairs(path: &str, regions: &[Vec<LdPair>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(open_output(path)?);

    for pairs in regions {
        for pair in pairs {
            writer.serialize(pair)?;
        }
    }
    writer.flush()?;
    Ok(())
}
