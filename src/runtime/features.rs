//! Runtime feature flags
//!
//! Queried by the external platform probe to report what this build of the
//! runtime supports: stream variants, compiled-in SIMD target features, and
//! the allocation granularity class.

use std::collections::HashMap;

use super::stream::PAGE_SIZE;

lazy_static::lazy_static! {
    static ref FEATURES: HashMap<&'static str, bool> = {
        let mut features = HashMap::new();
        features.insert("stream.fixed", true);
        features.insert("stream.object", true);
        features.insert("alloc.page-4k", PAGE_SIZE == 4096);
        features.insert("simd.sse2", cfg!(target_feature = "sse2"));
        features.insert("simd.avx2", cfg!(target_feature = "avx2"));
        features.insert("simd.neon", cfg!(target_feature = "neon"));
        features
    };
}

/// Whether this runtime build supports the named feature. Unknown names
/// report `false`.
pub fn feature(name: &str) -> bool {
    FEATURES.get(name).copied().unwrap_or(false)
}

/// All known feature names, for probe listings.
pub fn feature_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = FEATURES.keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_variants_always_supported() {
        assert!(feature("stream.fixed"));
        assert!(feature("stream.object"));
        assert!(!feature("no-such-feature"));
    }

    #[test]
    fn test_names_are_sorted_and_complete() {
        let names = feature_names();
        assert!(names.contains(&"simd.sse2"));
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
