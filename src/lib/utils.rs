//! Utility functions.

pub mod built_info {
    use lazy_static::lazy_static;
    include!(concat!(env!("OUT_DIR"), "/built.rs"));

    /// Get a software version string including
    ///   - Git commit hash
    ///   - Git dirty info (whether the repo had uncommitted changes)
    ///   - Cargo package version if no git info found
    fn get_software_version() -> String {
        let prefix = if let Some(s) = GIT_COMMIT_HASH {
            format!("{}-{}", PKG_VERSION, s[0..8].to_owned())
        } else {
            // This shouldn't happen
            PKG_VERSION.to_string()
        };
        let suffix = match GIT_DIRTY {
            Some(true) => "-dirty",
            _ => "",
        };
        format!("{}{}", prefix, suffix)
    }

    lazy_static! {
        /// Version of the software with git hash
        pub static ref VERSION: String = get_software_version();
    }
}

/// Bases that mark a base call as missing.
pub const NO_CALL_BASES: &[u8] = b"N.";

pub fn s(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

/// Reverse complement a barcode.  Bases other than `ACGT` (e.g. `N`) are kept as is.
pub fn reverse_complement(barcode: &[u8]) -> Vec<u8> {
    barcode
        .iter()
        .rev()
        .map(|base| match base.to_ascii_uppercase() {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => other,
        })
        .collect()
}

/// Hamming distance on slice of bytes.
///
/// Skips length check and will stop comparing after alpha is exhausted.
pub fn hamming_distance(alpha: &[u8], beta: &[u8]) -> usize {
    alpha.iter().zip(beta.iter()).map(|(a, b)| if a == b { 0 } else { 1 }).sum()
}

/// True if the barcode contains any no-call (`N` or `.`) base.
pub fn has_no_call(barcode: &[u8]) -> bool {
    barcode.iter().any(|b| NO_CALL_BASES.contains(&b.to_ascii_uppercase()))
}
