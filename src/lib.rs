// ============================================================================
// INKLINE — GPU-accelerated vector stroke pipeline
// ============================================================================
//
// Turns raw pointer samples into anti-aliased stroke drawables:
//
//   input samples  →  coordinate resolution (nested 2D transforms)
//                  →  variable-width outline + mesh + boundary edges
//                  →  jump-flood signed distance field (GPU, CPU fallback)
//                  →  composited pen/eraser drawable
//                  →  layer attach + undoable history command
//
// [`brush::BrushCore`] is the front door; hosts feed it samples and listen on
// its event hub.  The lower modules are public so embedders can drive the
// stages individually.

pub mod brush;
pub mod error;
pub mod events;
pub mod geometry;
pub mod gpu;
pub mod history;
pub mod layer;
pub mod logger;
pub mod settings;
pub mod transform;

pub use brush::BrushCore;
pub use error::PipelineError;
pub use events::PipelineEvent;
pub use geometry::{Sample, StrokeGeometry, StrokeGeometryBuilder};
pub use gpu::compositor::{StrokeCompositor, StrokeDrawable};
pub use gpu::context::{GpuContext, GpuPreference};
pub use gpu::distance_field::{cpu_distance_field, DistanceField, DistanceFieldPipeline};
pub use history::{Command, HistoryManager};
pub use layer::{Document, Layer, LayerBacking, LayerId, LayerMask, StrokeId};
pub use settings::{
    BrushMode, BrushSettings, FieldTuning, SettingsProvider, SmoothingParams, StaticSettings,
};
pub use transform::{
    CoordinateResolver, Mat2d, NodeId, SurfaceMetrics, TransformNode, TransformTree,
};
