//! Build-time information recorded by `build.rs`.

mod raw {
    // See https://docs.rs/built/latest/built/index.html for the full list of constants.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// The crate version such as 0.1.0
pub const GCINFO_PKG_VERSION: &str = raw::PKG_VERSION;

/// Comma separated features enabled for this build
pub const GCINFO_FEATURES: &str = raw::FEATURES_STR;

lazy_static! {
    /// Git version such as a96e8f991c91a81df51e7975849441f52fdbcdcc, or a96e8f991c91a81df51e7975849441f52fdbcdcc-dirty, or unknown-git-version if the crate
    /// is not built from a git repo.
    pub static ref GCINFO_GIT_VERSION: &'static str = &GCINFO_GIT_VERSION_STRING;

    // Owned string
    static ref GCINFO_GIT_VERSION_STRING: String = match (raw::GIT_COMMIT_HASH, raw::GIT_DIRTY) {
        (Some(hash), Some(true)) => format!("{}-dirty", hash),
        (Some(hash), _) => hash.to_string(),
        (None, _) => "unknown-git-version".to_string(),
    };

    /// Full build info, including the crate version, git version, and features
    pub static ref GCINFO_FULL_BUILD_INFO: String = format!(
        "gcinfo {} ({}, features: {})",
        GCINFO_PKG_VERSION,
        *GCINFO_GIT_VERSION,
        GCINFO_FEATURES
    );
}
