//! Compile-time width of the per-thread marker array (§3, §4.E).
cfg_if::cfg_if! {
    if #[cfg(feature = "markers_29")] {
        /// Number of per-thread phase markers. Chosen so `Entry` spans two
        /// whole cache lines: 12 bytes of scalars + 29 * 4 bytes = 128 bytes.
        pub const MARKER_COUNT: usize = 29;
    } else {
        /// Number of per-thread phase markers. Chosen so `Entry` fills
        /// exactly one 64-byte cache line: 12 bytes of scalars + 13 * 4
        /// bytes = 64 bytes.
        pub const MARKER_COUNT: usize = 13;
    }
}
