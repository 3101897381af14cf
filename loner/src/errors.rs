use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LonerError {
    #[error(
        "Unrecognized file format for {path:?}. Expected a file ending in '.loom' or '.h5ad'."
    )]
    UnsupportedFormat { path: PathBuf },

    #[error(
        "The known doublets file {path:?} has {found} entries but the dataset has {expected} \
         cells. Make sure known doublets are in the same order as your data."
    )]
    KnownDoubletsLength {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("Could not parse '{value}' on line {line} of {path:?} as a boolean doublet flag")]
    KnownDoubletsParse {
        path: PathBuf,
        line: usize,
        value: String,
    },

    #[error(
        "Requested {requested} simulated doublets in total but {known} known doublets are \
         already present. Increase the doublet ratio (-r)."
    )]
    NegativeDoubletCount { requested: usize, known: usize },

    #[error("The classifier dataset must contain exactly two labels, found {found:?}")]
    DegenerateLabels { found: Vec<u32> },

    #[error(
        "Expected number of doublets ({expected}) must be smaller than the number of cells ({num_cells})"
    )]
    InvalidExpectedDoublets { expected: usize, num_cells: usize },

    #[error("Invalid model parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Dataset has {found} {what} for {expected} {of}")]
    ShapeMismatch {
        what: &'static str,
        of: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Gene vocabularies differ between datasets ({left} vs {right} genes)")]
    GeneMismatch { left: usize, right: usize },
}
