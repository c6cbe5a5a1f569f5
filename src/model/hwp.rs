use counter::Counter;
use itertools::Itertools;
use statrs::distribution::{ChiSquared, Univariate};

use crate::model::Genotype;

/// Tally homozygote and heterozygote genotype counts. Genotypes with any
/// missing allele are ignored.
pub fn count_genos(genos: &[Genotype]) -> (u64, u64, u64) {
    let counts: Counter<Genotype> = genos.iter().filter(|g| !g.has_missing()).cloned().collect();

    let mut hom1 = 0;
    let mut het = 0;
    let mut hom2 = 0;
    for (geno, &n) in counts.iter().sorted_by_key(|&(g, _)| *g) {
        let n = n as u64;
        if geno.is_het() {
            het = n;
        } else if hom1 == 0 {
            hom1 = n;
        } else {
            hom2 = n;
        }
    }

    (hom1, het, hom2)
}

/// Exact SNP test for deviation from Hardy-Weinberg proportions, after
/// Wigginton, Cutler and Abecasis (2005), Am J Hum Genet 76: 887-93.
///
/// Complexity is O(min(hom1, hom2) + het) in time and space, so the caller
/// routes large samples to the asymptotic test instead.
pub fn hwp_exact_biallelic(hom1: u64, het: u64, hom2: u64) -> f64 {
    let rare = 2 * hom1.min(hom2) + het;
    let common = 2 * hom1.max(hom2) + het;
    if rare + common == 0 {
        return 1.;
    }

    // expected heterozygotes under HWP, parity-matched to the rare count
    let mut hets = rare * common / (rare + common);
    if rare % 2 != hets % 2 {
        hets += 1;
    }

    let hom_r = ((rare - hets) / 2) as i64;
    let hom_c = ((common - hets) / 2) as i64;

    let mut probs = vec![0.; (rare / 2 + 1) as usize];
    probs[(hets / 2) as usize] = 1.0;

    // fill in probabilities relative to the expected count, downwards
    let mut h = hets as i64;
    let mut i = 0i64;
    while h > 1 {
        probs[(h / 2 - 1) as usize] = probs[(h / 2) as usize] * (h * (h - 1)) as f64
            / (4 * (hom_r + i + 1) * (hom_c + i + 1)) as f64;
        h -= 2;
        i += 1;
    }

    // and upwards
    let mut h = hets as i64;
    let mut i = 0i64;
    while h < rare as i64 - 1 {
        probs[(h / 2 + 1) as usize] =
            probs[(h / 2) as usize] * (4 * (hom_r - i) * (hom_c - i)) as f64
                / ((h + 1) * (h + 2)) as f64;
        h += 2;
        i += 1;
    }

    let p_obs = probs[(het / 2) as usize];
    let total: f64 = probs.iter().sum();
    probs.iter().filter(|&&p| p <= p_obs).sum::<f64>() / total
}

/// Asymptotic chi-squared test for deviation from Hardy-Weinberg
/// proportions.
pub fn hwp_chisq_biallelic(hom1: u64, het: u64, hom2: u64) -> f64 {
    let n = hom1 + het + hom2;
    if n == 0 {
        return 1.;
    }
    let n = n as f64;

    let p = (2 * hom1 + het) as f64 / (2. * n);
    let q = (2 * hom2 + het) as f64 / (2. * n);

    let score = |o: f64, e: f64| if e <= 0. { 0. } else { (o - e).powi(2) / e };

    let xx = score(hom1 as f64, n * p * p)
        + score(het as f64, 2. * n * p * q)
        + score(hom2 as f64, n * q * q);

    if xx <= 0. {
        return 1.;
    }

    let chisq = ChiSquared::new(1.).unwrap();
    1. - chisq.cdf(xx)
}

/// Hardy-Weinberg p-value for a biallelic genotype vector. The exact test is
/// used below 1000 rare alleles, the asymptotic test beyond.
pub fn hwp_biallelic(genos: &[Genotype]) -> f64 {
    let (hom1, het, hom2) = count_genos(genos);

    if 2 * hom1.min(hom2) + het < 1000 {
        hwp_exact_biallelic(hom1, het, hom2)
    } else {
        hwp_chisq_biallelic(hom1, het, hom2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Genotype;

    #[test]
    fn test_count_genos() {
        let genos: Vec<Genotype> = "AA,AG,GG,AA,,AG"
            .split(',')
            .map(|t| Genotype::parse(t).unwrap())
            .collect();
        let (hom1, het, hom2) = count_genos(&genos);
        assert_eq!(het, 2);
        assert_eq!(hom1 + hom2, 3);
        assert_eq!(hom1.min(hom2), 1);
    }

    #[test]
    fn test_hwp_exact_balanced() {
        // 25/50/25 is the HWP expectation itself
        let p = hwp_exact_biallelic(25, 50, 25);
        assert!(p > 0.9, "p = {}", p);
    }

    #[test]
    fn test_hwp_exact_deviant() {
        // no heterozygotes at all with both alleles common
        let p = hwp_exact_biallelic(50, 0, 50);
        assert!(p < 1e-6, "p = {}", p);
    }

    #[test]
    fn test_exact_agrees_with_chisq() {
        let exact = hwp_exact_biallelic(300, 500, 200);
        let asymptotic = hwp_chisq_biallelic(300, 500, 200);
        assert!((exact - asymptotic).abs() < 0.05);
    }

    #[test]
    fn test_hwp_empty() {
        assert_eq!(hwp_chisq_biallelic(0, 0, 0), 1.);
        assert_eq!(hwp_exact_biallelic(0, 0, 0), 1.);
    }
}
