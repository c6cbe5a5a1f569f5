// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeSet;
use std::error::Error;

use structopt::StructOpt;

use crate::io;
use crate::model::Includes;
use crate::selection::{build_tag_criteria, TagSelector};
use crate::tagging::TaggerBuilder;

#[derive(Debug, StructOpt, Serialize, Deserialize, Clone)]
#[structopt(
    name = "tagzilla",
    about = "Robust and fast SNP binning and tagging from genotype data.",
    setting = structopt::clap::AppSettings::ColoredHelp,
)]
pub struct Tagzilla {
    // Input options
    #[structopt(
        short = "f",
        long = "format",
        default_value = "raw",
        help = "Format for genotype or LD input data. Values: raw (default), festa, hapmapld."
    )]
    pub format: String,
    #[structopt(
        short = "e",
        long = "excludetag",
        default_value = "",
        help = "File containing loci that are excluded from being a tag"
    )]
    pub exclude: String,
    #[structopt(
        short = "i",
        long = "includeuntyped",
        default_value = "",
        help = "File containing loci that are obligatorily tags and untyped (may not cover another obligate locus)"
    )]
    pub include_untyped: String,
    #[structopt(
        short = "I",
        long = "includetyped",
        default_value = "",
        help = "File containing loci that are obligatorily tags but have been typed (may cover another typed locus)"
    )]
    pub include_typed: String,
    #[structopt(
        short = "s",
        long = "subset",
        default_value = "",
        help = "File containing loci to be used in analysis"
    )]
    pub subset: String,
    #[structopt(
        short = "S",
        long = "ldsubset",
        default_value = "",
        help = "File containing loci around which LD will be analyzed (see -m/--maxdist)"
    )]
    pub ldsubset: String,
    #[structopt(
        short = "R",
        long = "range",
        help = "Ranges of genomic locations to analyze, as a comma separated list of start and end \
                coordinates \"S-E\". Open ends may be omitted; the end coordinate is exclusive."
    )]
    pub range: Option<String>,
    #[structopt(
        short = "D",
        long = "designscores",
        help = "Read in design scores or other weights to use as criteria to choose the optimal tag \
                for each bin, as FILE[:threshold[:scale]]"
    )]
    pub designscores: Vec<String>,
    #[structopt(
        short = "L",
        long = "limit",
        default_value = "0",
        help = "Limit the number of loci considered to N for testing purposes (0 for unlimited)"
    )]
    pub limit: usize,

    // Output options
    #[structopt(
        short = "b",
        long = "summary",
        default_value = "-",
        help = "Output summary tables to FILE ('-' for standard out)"
    )]
    pub sumfile: String,
    #[structopt(
        short = "B",
        long = "bininfo",
        help = "Output summary information about each bin to FILE"
    )]
    pub bininfo: Option<String>,
    #[structopt(
        short = "H",
        long = "histomax",
        default_value = "10",
        help = "Largest bin size output in summary histogram output"
    )]
    pub histomax: usize,
    #[structopt(
        short = "k",
        long = "skip",
        help = "Skip output of untagged or excluded loci"
    )]
    pub skip: bool,
    #[structopt(
        short = "o",
        long = "output",
        help = "Output tabular LD information for bins to FILE ('-' for standard out)"
    )]
    pub outfile: Option<String>,
    #[structopt(short = "O", long = "locusinfo", help = "Output locus information to FILE")]
    pub locusinfo: Option<String>,
    #[structopt(
        short = "u",
        long = "saveldpairs",
        help = "Output pairwise LD estimates to FILE"
    )]
    pub saveldpairs: Option<String>,
    #[structopt(short = "x", long = "extra", help = "Output inter-bin LD statistics")]
    pub extra: bool,

    // Genotype and LD estimation options
    #[structopt(
        short = "a",
        long = "minmaf",
        default_value = "0.05",
        help = "Minimum minor allele frequency (MAF)"
    )]
    pub maf: f64,
    #[structopt(
        short = "A",
        long = "minobmaf",
        help = "Minimum minor allele frequency (MAF) for obligate tags (defaults to -a/--minmaf)"
    )]
    pub obmaf: Option<f64>,
    #[structopt(
        short = "c",
        long = "mincompletion",
        default_value = "0",
        help = "Drop loci with less than N valid genotypes"
    )]
    pub mincompletion: usize,
    #[structopt(
        long = "mincompletionrate",
        default_value = "0",
        help = "Drop loci with completion rate less than N% (0-100)"
    )]
    pub mincompletionrate: f64,
    #[structopt(
        short = "m",
        long = "maxdist",
        default_value = "200",
        help = "Maximum inter-marker distance in kb for LD comparison"
    )]
    pub maxdist: u64,
    #[structopt(
        short = "P",
        long = "hwp",
        help = "Filter out loci that fail to meet a minimum significance level (pvalue) for a test \
                of Hardy-Weinberg proportion"
    )]
    pub hwp: Option<f64>,

    // Binning options
    #[structopt(
        short = "d",
        long = "dthreshold",
        default_value = "0",
        help = "Minimum d-prime threshold to output"
    )]
    pub dthreshold: f64,
    #[structopt(
        short = "r",
        long = "rthreshold",
        default_value = "0.8",
        help = "Minimum r-squared threshold to output"
    )]
    pub rthreshold: f64,
    #[structopt(
        short = "M",
        long = "multipopulation",
        help = "Multipopulation tagging where every N input files represent a group of populations. \
                May be specified as an integer N or a comma separated list of population labels."
    )]
    pub multipopulation: Option<String>,
    #[structopt(
        long = "multimethod",
        default_value = "global",
        help = "Merge populations when performing multipopulation tagging. \
                Values: merge2, merge3, minld, global."
    )]
    pub multimethod: String,
    #[structopt(
        short = "t",
        long = "targetbins",
        default_value = "0",
        help = "Stop when N bins have been selected (0 for unlimited)"
    )]
    pub targetbins: usize,
    #[structopt(
        short = "T",
        long = "targetloci",
        default_value = "0",
        help = "Stop when N loci have been tagged (0 for unlimited)"
    )]
    pub targetloci: usize,
    #[structopt(
        short = "C",
        long = "tagcriteria",
        help = "Use the specified criteria to choose the optimal tag for each bin, as crit[:weight]. \
                Values: maxsnp, avgsnp, maxtag, avgtag."
    )]
    pub tagcriteria: Vec<String>,
    #[structopt(
        short = "z",
        long = "locipertag",
        help = "Ensure that bins contain more than one tag per N loci. Bins with an insufficient \
                number of tags will be reduced."
    )]
    pub locipertag: Option<usize>,
    #[structopt(
        short = "Z",
        long = "loglocipertag",
        help = "Ensure that bins contain more than one tag per log_B(loci). Bins with an \
                insufficient number of tags will be reduced."
    )]
    pub loglocipertag: Option<f64>,
    #[structopt(
        long = "skipbinning",
        help = "Skip the binning step. Typically used in conjunction with -u/--saveldpairs"
    )]
    pub skipbinning: bool,

    #[structopt(name = "genofile", required = true)]
    pub genofiles: Vec<String>,
}

pub fn run(opt: Tagzilla) -> Result<(), Box<dyn Error>> {
    let mut subset = BTreeSet::new();
    let mut ldsubset = BTreeSet::new();
    let mut include_untyped = BTreeSet::new();
    let mut include_typed = BTreeSet::new();
    let mut exclude = BTreeSet::new();

    if !opt.subset.is_empty() {
        io::read_snp_list(&opt.subset, &mut subset)?;
    }
    if !opt.ldsubset.is_empty() {
        io::read_snp_list(&opt.ldsubset, &mut ldsubset)?;
    }
    if !opt.include_untyped.is_empty() {
        io::read_snp_list(&opt.include_untyped, &mut include_untyped)?;
    }
    if !opt.include_typed.is_empty() {
        io::read_snp_list(&opt.include_typed, &mut include_typed)?;
    }
    if !opt.exclude.is_empty() {
        io::read_snp_list(&opt.exclude, &mut exclude)?;
    }

    let includes = Includes::new(include_typed, include_untyped);
    let designscores = io::build_design_scores(&opt.designscores)?;
    let tagcriteria = build_tag_criteria(&opt.tagcriteria)?;
    let selector = TagSelector::new(designscores.clone(), tagcriteria);

    let tagger = TaggerBuilder::default()
        .options(opt)
        .includes(includes)
        .exclude(exclude)
        .subset(subset)
        .ldsubset(ldsubset)
        .designscores(designscores)
        .selector(selector)
        .build()?;

    tagger.run()?;
    Ok(())
}
