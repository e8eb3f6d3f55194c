// ============================================================================
// GPU — wgpu context, distance-field compute, stroke compositing
// ============================================================================

pub mod compositor;
pub mod context;
pub mod distance_field;
pub mod shaders;

/// Buffer rows in texture↔buffer copies must be aligned to
/// `COPY_BYTES_PER_ROW_ALIGNMENT` (256).
pub(crate) fn aligned_bytes_per_row(unaligned: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unaligned.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_alignment() {
        assert_eq!(aligned_bytes_per_row(1), 256);
        assert_eq!(aligned_bytes_per_row(256), 256);
        assert_eq!(aligned_bytes_per_row(257), 512);
        assert_eq!(aligned_bytes_per_row(1024), 1024);
    }
}
