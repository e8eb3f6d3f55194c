// ============================================================================
// SETTINGS — brush, smoothing, and distance-field tuning snapshots
// ============================================================================

use serde::{Deserialize, Serialize};

/// Whether a stroke deposits color or removes alpha.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrushMode {
    Pen,
    Eraser,
}

/// Brush parameters, snapshotted once at stroke start so mid-stroke setting
/// changes never retroactively alter an in-progress stroke.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BrushSettings {
    /// Full stroke diameter in canvas units. Must be > 0.
    pub size: f32,
    /// Straight (un-premultiplied) RGBA, each channel 0..1.
    pub color: [f32; 4],
    pub opacity: f32,
    /// 0 = soft falloff, 1 = crisp edge.
    pub hardness: f32,
    pub mode: BrushMode,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            size: 10.0,
            color: [0.0, 0.0, 0.0, 1.0],
            opacity: 1.0,
            hardness: 0.8,
            mode: BrushMode::Pen,
        }
    }
}

impl BrushSettings {
    /// Clamp all fields into their valid ranges.
    pub fn sanitized(mut self) -> Self {
        self.size = self.size.max(0.1);
        self.opacity = self.opacity.clamp(0.0, 1.0);
        self.hardness = self.hardness.clamp(0.0, 1.0);
        for c in &mut self.color {
            *c = c.clamp(0.0, 1.0);
        }
        self
    }
}

/// Input-filtering parameters. Lower values favor fidelity to the raw
/// samples, higher values favor visual smoothness.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SmoothingParams {
    /// Pressure-to-width coupling strength, 0..1.
    pub thinning: f32,
    /// Neighbor-averaging strength, 0..1.
    pub smoothing: f32,
    /// Pull toward the previous filtered point, 0..1.
    pub streamline: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            thinning: 0.5,
            smoothing: 0.5,
            streamline: 0.5,
        }
    }
}

/// Distance-field stage tuning.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FieldTuning {
    /// Integer oversampling of the field grid relative to canvas pixels.
    pub oversample: u32,
    /// Signed distance at which coverage crosses 50%.
    pub threshold: f32,
    /// Half-width of the coverage transition band, in canvas units.
    pub edge_softness: f32,
}

impl Default for FieldTuning {
    fn default() -> Self {
        Self {
            oversample: 2,
            threshold: 0.0,
            edge_softness: 1.0,
        }
    }
}

impl FieldTuning {
    pub fn sanitized(mut self) -> Self {
        self.oversample = self.oversample.clamp(1, 4);
        self.edge_softness = self.edge_softness.max(0.01);
        self
    }

    /// Effective transition half-width after applying brush hardness:
    /// harder brushes narrow the band toward a crisp edge.
    pub fn effective_softness(&self, hardness: f32) -> f32 {
        (self.edge_softness * (1.5 - hardness.clamp(0.0, 1.0))).max(0.01)
    }
}

/// Source of tool parameters, injected into the orchestrator at construction.
pub trait SettingsProvider: Send {
    fn brush(&self) -> BrushSettings;
    fn smoothing(&self) -> SmoothingParams;
    fn tuning(&self) -> FieldTuning;
}

/// Fixed settings, useful for hosts that manage tool state themselves.
#[derive(Clone, Debug, Default)]
pub struct StaticSettings {
    pub brush: BrushSettings,
    pub smoothing: SmoothingParams,
    pub tuning: FieldTuning,
}

impl SettingsProvider for StaticSettings {
    fn brush(&self) -> BrushSettings {
        self.brush
    }
    fn smoothing(&self) -> SmoothingParams {
        self.smoothing
    }
    fn tuning(&self) -> FieldTuning {
        self.tuning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_ranges() {
        let s = BrushSettings {
            size: -3.0,
            color: [2.0, -1.0, 0.5, 1.0],
            opacity: 1.7,
            hardness: -0.2,
            mode: BrushMode::Pen,
        }
        .sanitized();
        assert!(s.size > 0.0);
        assert_eq!(s.color, [1.0, 0.0, 0.5, 1.0]);
        assert_eq!(s.opacity, 1.0);
        assert_eq!(s.hardness, 0.0);
    }

    #[test]
    fn harder_brush_narrows_transition() {
        let t = FieldTuning::default();
        assert!(t.effective_softness(1.0) < t.effective_softness(0.0));
        assert!(t.effective_softness(1.0) > 0.0);
    }
}
