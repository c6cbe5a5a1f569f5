use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("input file {path} does not appear to be a genotype table (missing rs#/chr/pos header)")]
    UnrecognizedHeader { path: String },
    #[error("malformed record at line {line} of {path}: {msg}")]
    MalformedRecord {
        path: String,
        line: usize,
        msg: String,
    },
    #[error("locus {name} may have no more than two alleles")]
    TooManyAlleles { name: String },
    #[error("invalid genomic range: {spec}")]
    InvalidRange { spec: String },
    #[error("unknown genotype/LD data format: {name}")]
    UnknownFormat { name: String },
    #[error("unsupported multipopulation method: {name}")]
    UnknownMultiMethod { name: String },
    #[error("multipopulation analysis requires both --multipopulation and --multimethod")]
    MissingMultiMethod,
    #[error("multipopulation binning cannot accept pairwise LD input (FESTA or HapMap LD format)")]
    LdInputMultipop,
    #[error("the number of input files must be a multiple of the number of populations")]
    InputCountMismatch,
    #[error("genotype files may not contain overlapping loci")]
    OverlappingLoci,
    #[error("unknown tag information criterion: {name}")]
    UnknownCriterion { name: String },
    #[error("more than one output file directed to standard out")]
    StdoutConflict,
    #[error("LD estimate for pair ({name1}, {name2}) out of range: r2={r2}, dprime={dprime}")]
    InvalidLdEstimate {
        name1: String,
        name2: String,
        r2: f64,
        dprime: f64,
    },
}
