// ============================================================================
// ERROR TYPES — failure taxonomy for the stroke pipeline
// ============================================================================

/// Errors surfaced by the stroke pipeline.
///
/// Degenerate input (too few points, empty bounds) is deliberately NOT an
/// error: those paths return `None` and the stroke silently produces nothing.
/// Everything here is either a caller mistake (state machine misuse, locked
/// layer) or a GPU-side failure that is fatal to the single stroke attempt
/// but never to the session.
#[derive(Debug)]
pub enum PipelineError {
    /// The requested lifecycle transition is not allowed from the current state.
    InvalidState(&'static str),
    /// No active layer to draw on.
    LayerMissing,
    /// The target layer is locked.
    LayerLocked,
    /// A GPU pass failed to build or execute.
    Gpu(String),
    /// The stroke bounds exceed what the device can allocate.
    ResourceExhausted {
        width: u32,
        height: u32,
        max_dim: u32,
    },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            PipelineError::LayerMissing => write!(f, "no active layer"),
            PipelineError::LayerLocked => write!(f, "target layer is locked"),
            PipelineError::Gpu(e) => write!(f, "GPU error: {}", e),
            PipelineError::ResourceExhausted {
                width,
                height,
                max_dim,
            } => write!(
                f,
                "stroke bounds {}x{} exceed device texture limit {}",
                width, height, max_dim
            ),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<wgpu::BufferAsyncError> for PipelineError {
    fn from(e: wgpu::BufferAsyncError) -> Self {
        PipelineError::Gpu(format!("buffer map failed: {:?}", e))
    }
}
