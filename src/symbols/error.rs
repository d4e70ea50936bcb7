//! Error types for symbol loading.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("No debug database found (searched: {})", format_paths(searched))]
    PdbNotFound { searched: Vec<PathBuf> },

    #[error("Cannot open debug database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Debug database is unreadable: {0}")]
    Pdb(#[from] pdb::Error),
}

fn format_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, SymbolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_candidates() {
        let err = SymbolError::PdbNotFound {
            searched: vec![PathBuf::from("a.pdb"), PathBuf::from("b.pdb")],
        };
        assert_eq!(
            err.to_string(),
            "No debug database found (searched: a.pdb, b.pdb)"
        );

        let err = SymbolError::PdbNotFound { searched: vec![] };
        assert!(err.to_string().ends_with("(searched: nothing)"));
    }
}
