use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use tagzilla::binning::{
    binner, build_binsets, ResultDisposition, TagCount,
};
use tagzilla::cli::Tagzilla;
use tagzilla::model::ld::{count_haplotypes, estimate_ld};
use tagzilla::model::{sort_loci, Genotype, Includes, Locus};
use tagzilla::output::{sfloat, tag_disposition};
use tagzilla::scan::{scan_ldpairs, LdPair, LdTable};
use tagzilla::selection::{build_tag_criteria, TagSelector};
use tagzilla::tagging::TaggerBuilder;

fn genos(spec: &str) -> Vec<Genotype> {
    spec.split(',').map(|t| Genotype::parse(t).unwrap()).collect()
}

fn locus(name: &str, location: u64, spec: &str) -> Locus {
    Locus::new(name.to_owned(), location, genos(spec)).unwrap()
}

fn locus_map(loci: &[Locus]) -> BTreeMap<String, Locus> {
    loci.iter().map(|l| (l.name.clone(), l.clone())).collect()
}

fn bin_everything(
    loci: &[Locus],
    includes: &Includes,
    tag_count: TagCount,
) -> (Vec<tagzilla::binning::BinResult>, LdTable) {
    let mut sorted = loci.to_vec();
    sort_loci(&mut sorted);
    let pairs = scan_ldpairs(&sorted, 200_000, 0.8, 0.);
    let map = locus_map(&sorted);
    let mut exclude = BTreeSet::new();
    let (binsets, mut lddata) =
        build_binsets(&map, &[pairs], includes, &mut exclude, &BTreeMap::new());
    let mut results = binner(&map, binsets, &mut lddata, includes, tag_count);
    for (i, bin) in results.iter_mut().enumerate() {
        bin.binnum = i + 1;
    }
    (results, lddata)
}

// Scenario: two perfectly concordant biallelic loci 10 kb apart form one
// bin of size two in which either locus can stand for the other.
#[test]
fn test_concordant_pair() {
    let a = locus("a", 10_000, "AA,AA,GG,AA,GG,GG");
    let b = locus("b", 20_000, "CC,CC,TT,CC,TT,TT");

    let (r2, dprime) = estimate_ld(count_haplotypes(&a.genos, &b.genos));
    assert!((r2 - 1.).abs() < 1e-9);
    assert!((dprime - 1.).abs() < 1e-9);

    let (results, lddata) = bin_everything(&[a, b], &Includes::default(), TagCount::Single);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].len(), 2);
    assert_eq!(results[0].disposition, ResultDisposition::MaximalBin);
    // both loci cover the bin, so both are candidate tags
    assert_eq!(results[0].tags.len(), 2);
    assert_eq!(tag_disposition("a", &results[0]), "candidate-tag");
    assert!(lddata.is_empty());
}

// Scenario: a locus a megabase from its nearest neighbor stays a singleton.
#[test]
fn test_distant_singleton() {
    let near1 = locus("near1", 10_000, "AA,AG,GG,AA,AG,GG");
    let near2 = locus("near2", 20_000, "AA,AG,GG,AA,AG,GG");
    let far = locus("far", 1_200_000, "AA,AG,GG,AA,AG,GG");

    let (results, _) = bin_everything(&[near1, near2, far], &Includes::default(), TagCount::Single);
    assert_eq!(results.len(), 2);

    let singleton = results.iter().find(|r| r.len() == 1).unwrap();
    assert_eq!(singleton.tags, vec!["far".to_owned()]);
    assert_eq!(singleton.disposition, ResultDisposition::MaximalBin);
    assert_eq!(tag_disposition("far", singleton), "singleton-tag");
}

// Scenario: a five locus clique with locipertag 2 requires three tags, and
// the selector recommends exactly that many.
#[test]
fn test_clique_tags_required() {
    let names = ["a", "b", "c", "d", "e"];
    let loci: Vec<Locus> = names
        .iter()
        .enumerate()
        .map(|(i, name)| locus(name, 10_000 + 1_000 * i as u64, "AA,AG,GG,AA,AG,GG"))
        .collect();

    let (mut results, _) =
        bin_everything(&loci, &Includes::default(), TagCount::LociPerTag(2));
    assert_eq!(results.len(), 1);
    let bin = &mut results[0];
    assert_eq!(bin.len(), 5);
    assert_eq!(bin.tags_required, 3);
    assert!(bin.tags.len() >= 3);

    let criteria = build_tag_criteria(&["avgsnp".to_owned()]).unwrap();
    TagSelector::new(BTreeMap::new(), criteria).select_tags(bin);
    assert_eq!(bin.recommended_tags.len(), 3);
}

// Scenario: an untyped obligate inside a clique owns its bin and the other
// members become alternate tags.
#[test]
fn test_untyped_obligate_bin() {
    let names = ["u", "x1", "x2", "x3"];
    let loci: Vec<Locus> = names
        .iter()
        .enumerate()
        .map(|(i, name)| locus(name, 10_000 + 1_000 * i as u64, "AA,AG,GG,AA,AG,GG"))
        .collect();

    let untyped: BTreeSet<String> = vec!["u".to_owned()].into_iter().collect();
    let includes = Includes::new(BTreeSet::new(), untyped);

    let (results, _) = bin_everything(&loci, &includes, TagCount::Single);
    assert_eq!(results.len(), 1);
    let bin = &results[0];
    assert_eq!(bin.disposition, ResultDisposition::ObligateUntyped);
    assert_eq!(bin.include.as_deref(), Some("u"));
    assert_eq!(tag_disposition("u", bin), "untyped-tag");
    for other in &["x1", "x2", "x3"] {
        assert_eq!(tag_disposition(other, bin), "alternate-tag");
    }
}

// Scenario: two untyped obligates in mutual LD each get their own bin.
#[test]
fn test_conflicting_untyped_obligates() {
    let names = ["u1", "u2", "x"];
    let loci: Vec<Locus> = names
        .iter()
        .enumerate()
        .map(|(i, name)| locus(name, 10_000 + 1_000 * i as u64, "AA,AG,GG,AA,AG,GG"))
        .collect();

    let untyped: BTreeSet<String> = vec!["u1".to_owned(), "u2".to_owned()]
        .into_iter()
        .collect();
    let includes = Includes::new(BTreeSet::new(), untyped);

    let (results, _) = bin_everything(&loci, &includes, TagCount::Single);
    assert_eq!(results.len(), 2);
    for bin in &results {
        assert_eq!(bin.disposition, ResultDisposition::ObligateUntyped);
    }
    let u1_bin = results
        .iter()
        .find(|r| r.include.as_deref() == Some("u1"))
        .unwrap();
    let u2_bin = results
        .iter()
        .find(|r| r.include.as_deref() == Some("u2"))
        .unwrap();
    assert!(u1_bin.loci().all(|name| name != "u2"));
    assert!(u2_bin.loci().all(|name| name != "u1"));
}

// Invariant: tags and others of all bins partition the loci that entered
// the binner.
#[test]
fn test_partition_invariant() {
    let loci = vec![
        locus("a", 10_000, "AA,AG,GG,AA,AG,GG"),
        locus("b", 11_000, "AA,AG,GG,AA,AG,GG"),
        locus("c", 40_000, "CC,CT,TT,TT,CT,CC"),
        locus("d", 2_000_000, "AA,AG,GG,AA,AG,GG"),
        locus("e", 2_001_000, "TT,TT,CT,CC,CT,TT"),
    ];

    let (results, _) = bin_everything(&loci, &Includes::default(), TagCount::Single);

    let mut seen = BTreeSet::new();
    for bin in &results {
        for name in bin.loci() {
            assert!(seen.insert(name.clone()), "locus {} binned twice", name);
        }
    }
    assert_eq!(seen.len(), loci.len());
}

// Law: two identical runs produce byte-identical serialized output.
#[test]
fn test_determinism() {
    let loci = vec![
        locus("a", 10_000, "AA,AG,GG,AA,AG,GG"),
        locus("b", 11_000, "AA,AG,GG,AA,AG,GG"),
        locus("c", 12_000, "AA,AG,GG,GG,AG,AA"),
        locus("d", 40_000, "CC,CT,TT,TT,CT,CC"),
        locus("e", 41_000, "CC,CT,TT,TT,CT,CC"),
    ];

    let serialize = || {
        let (results, _) = bin_everything(&loci, &Includes::default(), TagCount::Single);
        let mut out = Vec::new();
        for bin in &results {
            for pair in &bin.ld {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{}",
                    bin.binnum,
                    pair.name1,
                    pair.name2,
                    sfloat(pair.r2),
                    sfloat(pair.dprime)
                )
                .unwrap();
            }
        }
        out
    };

    assert_eq!(serialize(), serialize());
}

// Law: LD is symmetric in its arguments.
#[test]
fn test_ld_symmetry() {
    let a = genos("AA,AG,GG,AA,AG,AA,GG,AG");
    let b = genos("CC,CT,CT,CC,TT,CT,TT,CC");
    assert_eq!(
        estimate_ld(count_haplotypes(&a, &b)),
        estimate_ld(count_haplotypes(&b, &a))
    );
}

fn default_options(genofiles: Vec<String>) -> Tagzilla {
    Tagzilla {
        format: "raw".to_owned(),
        exclude: String::new(),
        include_untyped: String::new(),
        include_typed: String::new(),
        subset: String::new(),
        ldsubset: String::new(),
        range: None,
        designscores: Vec::new(),
        limit: 0,
        sumfile: "-".to_owned(),
        bininfo: None,
        histomax: 10,
        skip: false,
        outfile: None,
        locusinfo: None,
        saveldpairs: None,
        extra: false,
        maf: 0.05,
        obmaf: None,
        mincompletion: 0,
        mincompletionrate: 0.,
        maxdist: 200,
        hwp: None,
        dthreshold: 0.,
        rthreshold: 0.8,
        multipopulation: None,
        multimethod: "global".to_owned(),
        targetbins: 0,
        targetloci: 0,
        tagcriteria: Vec::new(),
        locipertag: None,
        loglocipertag: None,
        skipbinning: false,
        genofiles,
    }
}

fn write_genofile(rows: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "rs#\tchr\tpos\ts1\ts2\ts3\ts4\ts5\ts6").unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
    file.flush().unwrap();
    file
}

// End to end: the driver reads a genotype table and writes the locus table.
#[test]
fn test_driver_end_to_end() {
    let genofile = write_genofile(&[
        "rs1\t1\t10000\tAA\tAG\tGG\tAA\tAG\tGG",
        "rs2\t1\t11000\tAA\tAG\tGG\tAA\tAG\tGG",
        "rs3\t1\t900000\tCC\tCT\tTT\tCC\tCT\tTT",
    ]);
    let locusinfo = tempfile::NamedTempFile::new().unwrap();
    let sumfile = tempfile::NamedTempFile::new().unwrap();

    let mut options = default_options(vec![genofile.path().to_str().unwrap().to_owned()]);
    options.locusinfo = Some(locusinfo.path().to_str().unwrap().to_owned());
    options.sumfile = sumfile.path().to_str().unwrap().to_owned();

    let tagger = TaggerBuilder::default()
        .options(options)
        .includes(Includes::default())
        .exclude(BTreeSet::new())
        .subset(BTreeSet::new())
        .ldsubset(BTreeSet::new())
        .designscores(BTreeMap::new())
        .selector(TagSelector::default())
        .build()
        .unwrap();
    tagger.run().unwrap();

    let table = std::fs::read_to_string(locusinfo.path()).unwrap();
    let mut lines = table.lines();
    assert_eq!(
        lines.next().unwrap(),
        "LNAME\tLOCATION\tPOPULATION\tMAF\tBINNUM\tDISPOSITION"
    );

    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 3);
    // rs1/rs2 share bin 1; rs3 is its own singleton bin
    assert!(rows
        .iter()
        .any(|row| row.starts_with("rs1\t10000\tuser specified\t0.5\t1\t")));
    assert!(rows
        .iter()
        .any(|row| row.starts_with("rs3\t900000\tuser specified\t0.5\t2\tsingleton-tag")));

    let summary = std::fs::read_to_string(sumfile.path()).unwrap();
    assert!(summary.contains("Bin statistics by disposition"));
}

// End to end: FESTA input drives the binner without genotypes.
#[test]
fn test_driver_festa_input() {
    let mut festa = tempfile::NamedTempFile::new().unwrap();
    writeln!(festa, "LNAME1 LNAME2 LD").unwrap();
    writeln!(festa, "rs1 rs2 0.93").unwrap();
    writeln!(festa, "rs2 rs3 0.4").unwrap();
    festa.flush().unwrap();

    let outfile = tempfile::NamedTempFile::new().unwrap();
    let sumfile = tempfile::NamedTempFile::new().unwrap();

    let mut options = default_options(vec![festa.path().to_str().unwrap().to_owned()]);
    options.format = "festa".to_owned();
    options.outfile = Some(outfile.path().to_str().unwrap().to_owned());
    options.sumfile = sumfile.path().to_str().unwrap().to_owned();

    let tagger = TaggerBuilder::default()
        .options(options)
        .includes(Includes::default())
        .exclude(BTreeSet::new())
        .subset(BTreeSet::new())
        .ldsubset(BTreeSet::new())
        .designscores(BTreeMap::new())
        .selector(TagSelector::default())
        .build()
        .unwrap();
    tagger.run().unwrap();

    let table = std::fs::read_to_string(outfile.path()).unwrap();
    assert!(table.starts_with("BIN\tLNAME1\tLNAME2\tPOPULATION\tRSQUARED\tDPRIME\tDISPOSITION"));
    // rs1-rs2 bin carries the pair at its FESTA r2 with no dprime
    assert!(table.contains("\trs1\trs2\tuser specified\t0.93\t0\ttag-tag"));
}

// Incompatible configuration: multipopulation analysis rejects pair input.
#[test]
fn test_multipop_rejects_ld_input() {
    let mut festa = tempfile::NamedTempFile::new().unwrap();
    writeln!(festa, "LNAME1 LNAME2 LD").unwrap();
    writeln!(festa, "rs1 rs2 0.93").unwrap();
    festa.flush().unwrap();

    let path = festa.path().to_str().unwrap().to_owned();
    let mut options = default_options(vec![path.clone(), path]);
    options.format = "festa".to_owned();
    options.multipopulation = Some("2".to_owned());
    options.multimethod = "minld".to_owned();
    options.sumfile = "-".to_owned();

    let tagger = TaggerBuilder::default()
        .options(options)
        .includes(Includes::default())
        .exclude(BTreeSet::new())
        .subset(BTreeSet::new())
        .ldsubset(BTreeSet::new())
        .designscores(BTreeMap::new())
        .selector(TagSelector::default())
        .build()
        .unwrap();
    assert!(tagger.run().is_err());
}

// minld: a pair failing its threshold in one population is vetoed and both
// populations fall back to singleton bins.
#[test]
fn test_minld_veto_end_to_end() {
    let strong = write_genofile(&[
        "rs1\t1\t10000\tAA\tAG\tGG\tAA\tAG\tGG",
        "rs2\t1\t11000\tAA\tAG\tGG\tAA\tAG\tGG",
    ]);
    let weak = write_genofile(&[
        "rs1\t1\t10000\tAA\tAG\tGG\tAA\tAG\tGG",
        "rs2\t1\t11000\tGG\tAG\tAA\tAG\tAA\tGG",
    ]);

    let locusinfo = tempfile::NamedTempFile::new().unwrap();
    let sumfile = tempfile::NamedTempFile::new().unwrap();

    let mut options = default_options(vec![
        strong.path().to_str().unwrap().to_owned(),
        weak.path().to_str().unwrap().to_owned(),
    ]);
    options.multipopulation = Some("A,B".to_owned());
    options.multimethod = "minld".to_owned();
    options.locusinfo = Some(locusinfo.path().to_str().unwrap().to_owned());
    options.sumfile = sumfile.path().to_str().unwrap().to_owned();

    let tagger = TaggerBuilder::default()
        .options(options)
        .includes(Includes::default())
        .exclude(BTreeSet::new())
        .subset(BTreeSet::new())
        .ldsubset(BTreeSet::new())
        .designscores(BTreeMap::new())
        .selector(TagSelector::default())
        .build()
        .unwrap();
    tagger.run().unwrap();

    let table = std::fs::read_to_string(locusinfo.path()).unwrap();
    let rows: Vec<&str> = table.lines().skip(1).collect();
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert!(row.contains("singleton-tag"), "unexpected row: {}", row);
    }
}

// merge2 filters per population before merging: a locus monomorphic in one
// population is dropped there, and the merged pair rests on the informative
// population alone. merge3 defers filtering to the merged sample, where the
// monomorphic half dilutes the LD below threshold.
#[test]
fn test_merge_policies_filter_placement() {
    let run_merge = |method: &str| {
        let pop_a = write_genofile(&[
            "rs1\t1\t10000\tAA\tAA\tAA\tAA\tAA\tAA",
            "rs2\t1\t11000\tAA\tAG\tGG\tAA\tAG\tGG",
        ]);
        let pop_b = write_genofile(&[
            "rs1\t1\t10000\tAA\tAG\tGG\tAA\tAG\tGG",
            "rs2\t1\t11000\tAA\tAG\tGG\tAA\tAG\tGG",
        ]);
        let locusinfo = tempfile::NamedTempFile::new().unwrap();
        let sumfile = tempfile::NamedTempFile::new().unwrap();

        let mut options = default_options(vec![
            pop_a.path().to_str().unwrap().to_owned(),
            pop_b.path().to_str().unwrap().to_owned(),
        ]);
        options.multipopulation = Some("2".to_owned());
        options.multimethod = method.to_owned();
        options.locusinfo = Some(locusinfo.path().to_str().unwrap().to_owned());
        options.sumfile = sumfile.path().to_str().unwrap().to_owned();

        let tagger = TaggerBuilder::default()
            .options(options)
            .includes(Includes::default())
            .exclude(BTreeSet::new())
            .subset(BTreeSet::new())
            .ldsubset(BTreeSet::new())
            .designscores(BTreeMap::new())
            .selector(TagSelector::default())
            .build()
            .unwrap();
        tagger.run().unwrap();

        let table = std::fs::read_to_string(locusinfo.path()).unwrap();
        let bins: BTreeSet<&str> = table
            .lines()
            .skip(1)
            .map(|row| row.split('\t').nth(4).unwrap())
            .collect();
        bins.len()
    };

    // merge2: rs1 drops out of population A (monomorphic), the pair is
    // estimated on population B only and both loci share one bin
    assert_eq!(run_merge("merge2"), 1);
    // merge3: the monomorphic half of the merged sample weakens the pair
    // and each locus ends up a singleton
    assert_eq!(run_merge("merge3"), 2);
}

// The residual cap marks bins beyond the target as residual.
#[test]
fn test_targetbins_residual() {
    let genofile = write_genofile(&[
        "rs1\t1\t10000\tAA\tAG\tGG\tAA\tAG\tGG",
        "rs2\t1\t11000\tAA\tAG\tGG\tAA\tAG\tGG",
        "rs3\t1\t900000\tCC\tCT\tTT\tCC\tCT\tTT",
    ]);
    let locusinfo = tempfile::NamedTempFile::new().unwrap();
    let sumfile = tempfile::NamedTempFile::new().unwrap();

    let mut options = default_options(vec![genofile.path().to_str().unwrap().to_owned()]);
    options.targetbins = 1;
    options.locusinfo = Some(locusinfo.path().to_str().unwrap().to_owned());
    options.sumfile = sumfile.path().to_str().unwrap().to_owned();

    let tagger = TaggerBuilder::default()
        .options(options)
        .includes(Includes::default())
        .exclude(BTreeSet::new())
        .subset(BTreeSet::new())
        .ldsubset(BTreeSet::new())
        .designscores(BTreeMap::new())
        .selector(TagSelector::default())
        .build()
        .unwrap();
    tagger.run().unwrap();

    let table = std::fs::read_to_string(locusinfo.path()).unwrap();
    let residuals: Vec<&str> = table
        .lines()
        .filter(|row| row.ends_with(",residual"))
        .collect();
    assert_eq!(residuals.len(), 1);
}

// Saved LD pairs table round trips through the serializer.
#[test]
fn test_saveldpairs_table() {
    let genofile = write_genofile(&[
        "rs1\t1\t10000\tAA\tAG\tGG\tAA\tAG\tGG",
        "rs2\t1\t11000\tAA\tAG\tGG\tAA\tAG\tGG",
    ]);
    let saved = tempfile::NamedTempFile::new().unwrap();
    let sumfile = tempfile::NamedTempFile::new().unwrap();

    let mut options = default_options(vec![genofile.path().to_str().unwrap().to_owned()]);
    options.saveldpairs = Some(saved.path().to_str().unwrap().to_owned());
    options.skipbinning = true;
    options.sumfile = sumfile.path().to_str().unwrap().to_owned();

    let tagger = TaggerBuilder::default()
        .options(options)
        .includes(Includes::default())
        .exclude(BTreeSet::new())
        .subset(BTreeSet::new())
        .ldsubset(BTreeSet::new())
        .designscores(BTreeMap::new())
        .selector(TagSelector::default())
        .build()
        .unwrap();
    tagger.run().unwrap();

    let table = std::fs::read_to_string(saved.path()).unwrap();
    let mut lines = table.lines();
    assert_eq!(lines.next().unwrap(), "LNAME1\tLNAME2\tRSQUARED\tDPRIME");
    let row = lines.next().unwrap();
    assert!(row.starts_with("rs1\trs2\t"));
}

// LdPair construction helper keeps the r2/dprime pairing straight.
#[test]
fn test_ldpair_new() {
    let pair = LdPair::new("a".to_owned(), "b".to_owned(), 0.9, 0.95);
    assert_eq!(pair.r2, 0.9);
    assert_eq!(pair.dprime, 0.95);
}
