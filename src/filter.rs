//! Manifest text filter that removes ad-break boundary markers.
//!
//! Installed as a manifest/level response interceptor on the streaming
//! engine when ad filtering is enabled. Stateless: every line carrying a
//! discontinuity tag is dropped, all other lines pass through unchanged.

/// Tag marking a boundary between disjoint streams, used by ad stitchers.
pub const DISCONTINUITY_TAG: &str = "#EXT-X-DISCONTINUITY";

/// Strip every line containing a discontinuity marker from manifest text.
/// Returns the input unchanged when it is empty.
pub fn strip_boundary_markers(manifest: &str) -> String {
    if manifest.is_empty() {
        return String::new();
    }
    manifest
        .split('\n')
        .filter(|line| !line.contains(DISCONTINUITY_TAG))
        .collect::<Vec<_>>()
        .join("\n")
}
