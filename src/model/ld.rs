// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;

use crate::model::{Genotype, MISSING_ALLELE};
use crate::EPSILON;

/// Two-locus haplotype counts from unphased diploid genotypes.
///
/// `c11`..`c22` count phase-resolved haplotypes by allele configuration;
/// `dh` counts double heterozygotes, whose phase is ambiguous and which are
/// resolved by the EM estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HaplotypeCounts {
    pub c11: u64,
    pub c12: u64,
    pub c21: u64,
    pub c22: u64,
    pub dh: u64,
}

/// The heterozygote exemplar of a locus: its (at most two) observed alleles
/// in sorted order, padded with NUL so that a missing allele never matches.
fn het_exemplar<'a>(genos: impl Iterator<Item = &'a Genotype>) -> (u8, u8) {
    let mut alleles = [0u8; 2];
    let mut n = 0;
    for geno in genos {
        let (a, b) = geno.alleles();
        for allele in &[a, b] {
            if *allele == MISSING_ALLELE || alleles[..n].contains(allele) {
                continue;
            }
            debug_assert!(n < 2, "more than two alleles at one locus");
            alleles[n] = *allele;
            n += 1;
        }
    }
    alleles[..n].sort_unstable();
    (alleles[0], if n > 1 { alleles[1] } else { 0 })
}

fn pick(geno: (u8, u8), index: usize) -> u8 {
    if index == 0 {
        geno.0
    } else {
        geno.1
    }
}

/// Count the haplotype configurations of two aligned genotype vectors.
///
/// Samples missing either genotype are dropped. Genotypes with one missing
/// allele are flipped so that the known allele lines up with the exemplar
/// heterozygote and contribute the configurations they are consistent with;
/// pairs of known homozygotes determine both haplotypes and count twice.
pub fn count_haplotypes(genos1: &[Genotype], genos2: &[Genotype]) -> HaplotypeCounts {
    debug_assert_eq!(genos1.len(), genos2.len());

    let mut diplo: HashMap<(Genotype, Genotype), u64> = HashMap::new();
    for (g1, g2) in genos1.iter().zip(genos2) {
        if g1.is_missing() || g2.is_missing() {
            continue;
        }
        *diplo.entry((*g1, *g2)).or_insert(0) += 1;
    }

    let het1 = het_exemplar(diplo.keys().map(|(g, _)| g));
    let het2 = het_exemplar(diplo.keys().map(|(_, g)| g));

    const CONFIGURATIONS: [(usize, usize); 4] = [(0, 0), (0, 1), (1, 0), (1, 1)];
    let mut x = [0u64; 4];
    let mut dh = 0u64;

    for ((g1, g2), &n) in &diplo {
        let mut g1 = g1.alleles();
        let mut g2 = g2.alleles();

        if g1 == het1 && g2 == het2 {
            dh += n;
            continue;
        }

        if (g1.0 == MISSING_ALLELE || g1.1 == MISSING_ALLELE) && g1.1 != het1.1 {
            g1 = (g1.1, g1.0);
        }
        if (g2.0 == MISSING_ALLELE || g2.1 == MISSING_ALLELE) && g2.1 != het2.1 {
            g2 = (g2.1, g2.0);
        }

        // Known homozygote pairs determine both haplotypes and appear in
        // only one configuration; all other informative pairs appear in two.
        let missing = [g1.0, g1.1, g2.0, g2.1].contains(&MISSING_ALLELE);
        let n = if !missing && g1 != het1 && g2 != het2 {
            n * 2
        } else {
            n
        };

        for (i, &(a, b)) in CONFIGURATIONS.iter().enumerate() {
            if pick(g1, a) == pick(het1, a) && pick(g2, b) == pick(het2, b) {
                x[i] += n;
            }
        }
    }

    HaplotypeCounts {
        c11: x[0],
        c12: x[1],
        c21: x[2],
        c22: x[3],
        dh,
    }
}

/// Estimate (r², D′) from two-locus haplotype counts.
///
/// Maximizes the likelihood of the 2x2 haplotype frequency table with the
/// double heterozygote pool resolved by EM, starting from the product of the
/// allele marginals. Frequencies are clamped away from the boundary so that
/// every log stays finite; convergence is declared when the log-likelihood
/// moves less than 10e-9, with a hard cap of 100 iterations after which the
/// final iterate is used as-is.
pub fn estimate_ld(counts: HaplotypeCounts) -> (f64, f64) {
    let HaplotypeCounts {
        c11,
        c12,
        c21,
        c22,
        dh,
    } = counts;

    // monomorphic marker on either side and nothing ambiguous: no LD
    if dh == 0 && (c11 + c12 == 0 || c21 + c22 == 0 || c11 + c21 == 0 || c12 + c22 == 0) {
        return (0., 0.);
    }

    const TOLERANCE: f64 = 10e-9;

    let n = (c11 + c12 + c21 + c22 + 2 * dh) as f64;
    let (c11, c12, c21, c22, dh) = (
        c11 as f64,
        c12 as f64,
        c21 as f64,
        c22 as f64,
        dh as f64,
    );

    let p = (c11 + c12 + dh) / n;
    let q = (c11 + c21 + dh) / n;

    let mut p11 = p * q;
    let mut p12 = p * (1. - q);
    let mut p21 = (1. - p) * q;
    let mut p22 = (1. - p) * (1. - q);

    let mut loglike = -999_999_999.;

    for _ in 0..100 {
        let oldloglike = loglike;

        p11 = p11.max(EPSILON);
        p12 = p12.max(EPSILON);
        p21 = p21.max(EPSILON);
        p22 = p22.max(EPSILON);

        let a = p11 * p22 + p12 * p21;

        loglike =
            c11 * p11.ln() + c12 * p12.ln() + c21 * p21.ln() + c22 * p22.ln() + dh * a.ln();

        if (loglike - oldloglike).abs() < TOLERANCE {
            break;
        }

        let nx1 = dh * p11 * p22 / a;
        let nx2 = dh * p12 * p21 / a;

        p11 = (c11 + nx1) / n;
        p12 = (c12 + nx2) / n;
        p21 = (c21 + nx2) / n;
        p22 = (c22 + nx1) / n;
    }

    let d = p11 * p22 - p12 * p21;

    let dmax = if d > 0. {
        (p * (1. - q)).min((1. - p) * q)
    } else {
        -(p * q).min((1. - p) * (1. - q))
    };

    let dprime = d / dmax;
    let r2 = d * d / (p * (1. - p) * q * (1. - q));

    (r2, dprime)
}

/// Closed-form upper bound on r² that ignores the double heterozygotes,
/// used to skip the EM for pairs that cannot reach the threshold. The -0.005
/// coupling tolerance keeps borderline repulsion configurations on the
/// conservative branch. Returns 1.0 (never skip) when no phase-resolved
/// haplotypes were observed.
pub fn bound_r2(counts: HaplotypeCounts) -> f64 {
    let total = counts.c11 + counts.c12 + counts.c21 + counts.c22 + 2 * counts.dh;
    if total == 0 {
        return 1.;
    }
    let n = total as f64;

    let mut p = (counts.c11 + counts.c12 + counts.dh) as f64 / n;
    let mut q = (counts.c11 + counts.c21 + counts.dh) as f64 / n;
    let (mut c11, mut c12, mut c21, mut c22) = (
        counts.c11 as f64,
        counts.c12 as f64,
        counts.c21 as f64,
        counts.c22 as f64,
    );

    // normalize to minor allele frequencies with the counts following along
    if p > 0.5 {
        p = 1. - p;
        let (a, b, c, d) = (c21, c22, c11, c12);
        c11 = a;
        c12 = b;
        c21 = c;
        c22 = d;
    }
    if q > 0.5 {
        q = 1. - q;
        let (a, b, c, d) = (c12, c11, c22, c21);
        c11 = a;
        c12 = b;
        c21 = c;
        c22 = d;
    }
    if p > q {
        std::mem::swap(&mut p, &mut q);
        let (a, b, c, d) = (c22, c21, c12, c11);
        c11 = a;
        c12 = b;
        c21 = c;
        c22 = d;
    }

    let m = n - 2. * counts.dh as f64;
    if m <= 0. {
        return 1.;
    }
    let d = (c11 * c22 - c12 * c21) / m / m;

    let dmax = if d > -0.005 {
        (p * (1. - q)).min((1. - p) * q)
    } else {
        -(p * q).min((1. - p) * (1. - q))
    };

    if p > 0. {
        dmax * dmax / (p * (1. - p) * q * (1. - q))
    } else {
        1.
    }
}
