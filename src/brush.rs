// ============================================================================
// BRUSH CORE — stroke lifecycle orchestrator
// ============================================================================
//
// Drives one pointer stroke through the whole pipeline:
//
//   samples → coordinate resolution → geometry accumulation
//           → (throttled) preview drawables while drawing
//           → distance field → composite / mask carve on finalize
//           → document attach + undo command + committed event
//
// Exactly one stroke can be in progress; settings are snapshotted at stroke
// start so mid-stroke changes never alter it retroactively.  Every exit
// from `finalize_stroke` and `cancel_stroke` leaves the core idle.

use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::events::{EventHub, PipelineEvent};
use crate::geometry::{
    compute_bounds, extract_edges, Mesh, Sample, StrokeGeometry, StrokeGeometryBuilder,
    StrokePoint,
};
use crate::gpu::compositor::{StrokeCompositor, StrokeDrawable};
use crate::gpu::context::GpuContext;
use crate::gpu::distance_field::DistanceFieldPipeline;
use crate::history::{CommitStrokeCommand, HistoryManager, MaskEraseCommand};
use crate::layer::{CommittedStroke, Document, LayerBacking, LayerId, StrokeId};
use crate::settings::{BrushMode, BrushSettings, FieldTuning, SettingsProvider, SmoothingParams};
use crate::transform::{CoordinateResolver, NodeId, SurfaceMetrics, TransformNode, TransformTree};
use crate::{log_err, log_info, log_warn};

/// Minimum time between preview rebuilds while drawing.
const PREVIEW_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// PREVIEW GATE
// ============================================================================

/// Single-flight throttle for preview generation: at most one rebuild in
/// flight, at most one per interval.  Samples arriving in between simply
/// extend the stroke; they are never queued.
struct PreviewGate {
    last_emit: Option<Instant>,
    in_flight: bool,
}

impl PreviewGate {
    fn new() -> Self {
        Self {
            last_emit: None,
            in_flight: false,
        }
    }

    fn try_begin(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        if let Some(t) = self.last_emit
            && t.elapsed() < PREVIEW_INTERVAL
        {
            return false;
        }
        self.in_flight = true;
        true
    }

    fn finish(&mut self) {
        self.in_flight = false;
        self.last_emit = Some(Instant::now());
    }
}

// ============================================================================
// ACTIVE STROKE
// ============================================================================

struct ActiveStroke {
    id: StrokeId,
    layer: LayerId,
    target: NodeId,
    builder: StrokeGeometryBuilder,
    brush: BrushSettings,
    smoothing: SmoothingParams,
    tuning: FieldTuning,
    gate: PreviewGate,
    preview: Option<StrokeDrawable>,
}

// ============================================================================
// BRUSH CORE
// ============================================================================

pub struct BrushCore {
    ctx: GpuContext,
    fields: DistanceFieldPipeline,
    compositor: StrokeCompositor,
    pub tree: TransformTree,
    resolver: CoordinateResolver,
    pub doc: Document,
    history: HistoryManager,
    events: EventHub,
    settings: Box<dyn SettingsProvider>,
    active: Option<ActiveStroke>,
}

impl BrushCore {
    pub fn new(
        ctx: GpuContext,
        surface: SurfaceMetrics,
        settings: Box<dyn SettingsProvider>,
    ) -> Self {
        let fields = DistanceFieldPipeline::new(&ctx.device);
        let compositor = StrokeCompositor::new(&ctx.device);
        Self {
            ctx,
            fields,
            compositor,
            tree: TransformTree::new(TransformNode::default()),
            resolver: CoordinateResolver::new(surface),
            doc: Document::new(),
            history: HistoryManager::default(),
            events: EventHub::new(),
            settings,
            active: None,
        }
    }

    pub fn set_surface(&mut self, surface: SurfaceMetrics) {
        self.resolver.set_surface(surface);
    }

    pub fn subscribe(&mut self) -> std::sync::mpsc::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn is_drawing(&self) -> bool {
        self.active.is_some()
    }

    /// Latest preview drawable for the in-progress stroke, if any.
    pub fn preview_drawable(&self) -> Option<&StrokeDrawable> {
        self.active.as_ref().and_then(|a| a.preview.as_ref())
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn undo(&mut self) -> Option<String> {
        self.history.undo(&mut self.doc)
    }

    pub fn redo(&mut self) -> Option<String> {
        self.history.redo(&mut self.doc)
    }

    // ========================================================================
    // STROKE LIFECYCLE
    // ========================================================================

    /// Begin a stroke on the active layer with a settings snapshot.
    pub fn start_stroke(&mut self, sample: Sample) -> Result<StrokeId, PipelineError> {
        if self.active.is_some() {
            return Err(PipelineError::InvalidState("a stroke is already in progress"));
        }
        let layer_id = self.doc.active.ok_or(PipelineError::LayerMissing)?;
        let layer = self.doc.layer(layer_id).ok_or(PipelineError::LayerMissing)?;
        if layer.locked {
            return Err(PipelineError::LayerLocked);
        }
        let target = layer.transform.unwrap_or_else(|| self.tree.root());

        let Some((x, y)) = self.resolver.resolve(&self.tree, sample.x, sample.y, target) else {
            return Err(PipelineError::InvalidState("drawing surface is not sized yet"));
        };

        let id = StrokeId::new();
        self.active = Some(ActiveStroke {
            id,
            layer: layer_id,
            target,
            builder: StrokeGeometryBuilder::start(StrokePoint {
                x,
                y,
                pressure: sample.pressure.clamp(0.0, 1.0),
            }),
            brush: self.settings.brush().sanitized(),
            smoothing: self.settings.smoothing(),
            tuning: self.settings.tuning().sanitized(),
            gate: PreviewGate::new(),
            preview: None,
        });
        Ok(id)
    }

    /// Extend the in-progress stroke.  A no-op while idle, so stray pointer
    /// moves after finalize/cancel are harmless.
    pub fn update_stroke(&mut self, sample: Sample) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some((x, y)) =
            self.resolver
                .resolve(&self.tree, sample.x, sample.y, active.target)
        else {
            return;
        };
        active.builder.add_point(StrokePoint {
            x,
            y,
            pressure: sample.pressure.clamp(0.0, 1.0),
        });

        if !active.gate.try_begin() {
            return;
        }
        let outline = active
            .builder
            .preview_outline(active.brush.size, active.smoothing.thinning);
        if outline.len() >= 3 {
            let bounds = compute_bounds(&outline);
            let edges = extract_edges(&outline);
            let geo = StrokeGeometry {
                outline,
                mesh: Mesh::default(), // previews skip triangulation
                edges,
                bounds,
            };
            // Previews render at reduced opacity; the commit pass uses the
            // snapshotted settings unmodified.
            let mut preview_brush = active.brush;
            preview_brush.opacity *= 0.85;
            match self.fields.run(&self.ctx, &geo, &active.tuning) {
                Ok(Some(field)) => {
                    match self
                        .compositor
                        .composite(&self.ctx, &field, &preview_brush, &active.tuning)
                    {
                        Ok(drawable) => {
                            active.preview = Some(drawable);
                            self.events
                                .emit(PipelineEvent::StrokePreviewing { stroke: active.id });
                        }
                        Err(e) => log_warn!("preview composite failed: {}", e),
                    }
                }
                Ok(None) => {}
                Err(e) => log_warn!("preview field failed: {}", e),
            }
        }
        active.gate.finish();
    }

    /// Finalize the in-progress stroke.  Always returns the core to idle.
    ///
    /// `Ok(None)` means the stroke was degenerate and silently discarded;
    /// `Ok(Some(id))` means a drawable was committed (or a mask carved) and
    /// an undo entry pushed.
    pub fn finalize_stroke(&mut self) -> Result<Option<StrokeId>, PipelineError> {
        let Some(active) = self.active.take() else {
            return Err(PipelineError::InvalidState("no stroke in progress"));
        };

        let Some(geometry) = active.builder.finalize(active.brush.size, &active.smoothing)
        else {
            log_info!("degenerate stroke discarded");
            return Ok(None);
        };

        let field = match self.fields.run(&self.ctx, &geometry, &active.tuning) {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => {
                log_err!("distance field failed, stroke discarded: {}", e);
                return Err(e);
            }
        };

        let layer = self
            .doc
            .layer(active.layer)
            .ok_or(PipelineError::LayerMissing)?;
        let mask_erase = active.brush.mode == BrushMode::Eraser
            && layer.backing == LayerBacking::RasterMask
            && layer.mask.is_some();

        if mask_erase {
            self.finalize_mask_erase(&active, &geometry, &field)?;
        } else {
            let drawable = self
                .compositor
                .composite(&self.ctx, &field, &active.brush, &active.tuning)
                .inspect_err(|e| log_err!("composite failed, stroke discarded: {}", e))?;
            let bytes = drawable.memory_bytes();
            self.doc.arena.insert(CommittedStroke {
                stroke: active.id,
                layer: active.layer,
                drawable,
            });
            if let Some(layer) = self.doc.layer_mut(active.layer) {
                layer.attach(active.id);
            }
            let description = match active.brush.mode {
                BrushMode::Pen => "Pen Stroke",
                BrushMode::Eraser => "Eraser Stroke",
            };
            self.history.push(
                &mut self.doc,
                Box::new(CommitStrokeCommand::new(
                    active.layer,
                    active.id,
                    description.to_string(),
                    bytes,
                )),
            );
        }

        self.events.emit(PipelineEvent::StrokeCommitted {
            layer: active.layer,
            stroke: active.id,
        });
        Ok(Some(active.id))
    }

    /// Eraser on a mask-backed layer: carve the persistent mask in place and
    /// record before/after patches of the affected region for undo.
    fn finalize_mask_erase(
        &mut self,
        active: &ActiveStroke,
        geometry: &StrokeGeometry,
        field: &crate::gpu::distance_field::DistanceField,
    ) -> Result<(), PipelineError> {
        let command = {
            let layer = self
                .doc
                .layer(active.layer)
                .ok_or(PipelineError::LayerMissing)?;
            let Some(mask) = layer.mask.as_ref() else {
                return Ok(());
            };
            let Some((x, y, w, h)) = mask.clamp_rect(&geometry.bounds) else {
                return Ok(()); // stroke entirely off the mask
            };
            let before = StrokeCompositor::readback_mask_region(&self.ctx, mask, x, y, w, h)?;
            self.compositor.subtract_mask(
                &self.ctx,
                field,
                &geometry.mesh,
                mask,
                &active.brush,
                &active.tuning,
            )?;
            let after = StrokeCompositor::readback_mask_region(&self.ctx, mask, x, y, w, h)?;
            MaskEraseCommand::new(
                active.layer,
                self.ctx.queue.clone(),
                x,
                y,
                w,
                h,
                before,
                after,
                "Erase".to_string(),
            )
        };
        self.history.push(&mut self.doc, Box::new(command));
        Ok(())
    }

    /// Abandon the in-progress stroke without producing any output.
    pub fn cancel_stroke(&mut self) {
        if let Some(active) = self.active.take() {
            self.events
                .emit(PipelineEvent::StrokeCancelled { stroke: active.id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::GpuPreference;
    use crate::settings::StaticSettings;

    fn surface() -> SurfaceMetrics {
        SurfaceMetrics {
            left: 0.0,
            top: 0.0,
            width: 800.0,
            height: 600.0,
            canvas_width: 800.0,
            canvas_height: 600.0,
        }
    }

    fn core() -> Option<BrushCore> {
        let ctx = GpuContext::new(GpuPreference::HighPerformance)?;
        Some(BrushCore::new(
            ctx,
            surface(),
            Box::new(StaticSettings::default()),
        ))
    }

    fn draw_line(core: &mut BrushCore) -> StrokeId {
        let id = core.start_stroke(Sample::at(100.0, 100.0, 0.5)).expect("start");
        for i in 1..=10 {
            core.update_stroke(Sample::at(100.0 + i as f32 * 5.0, 100.0, 0.6));
        }
        id
    }

    #[test]
    fn commit_undo_redo_round_trip() {
        let Some(mut core) = core() else { return };
        let layer = core.doc.add_layer("ink", LayerBacking::Drawables);
        let rx = core.subscribe();

        let id = draw_line(&mut core);
        let committed = core.finalize_stroke().expect("finalize").expect("committed");
        assert_eq!(committed, id);
        assert_eq!(
            rx.try_iter().last(),
            Some(PipelineEvent::StrokeCommitted { layer, stroke: id })
        );
        assert!(core.doc.layer(layer).is_some_and(|l| l.contains(id)));
        assert!(core.doc.arena.contains(id));

        assert_eq!(core.undo().as_deref(), Some("Pen Stroke"));
        assert!(core.doc.layer(layer).is_some_and(|l| !l.contains(id)));
        // Parked in the arena for redo, not dropped.
        assert!(core.doc.arena.contains(id));

        assert_eq!(core.redo().as_deref(), Some("Pen Stroke"));
        assert!(core.doc.layer(layer).is_some_and(|l| l.contains(id)));
    }

    #[test]
    fn abandoned_redo_branch_releases_drawable() {
        let Some(mut core) = core() else { return };
        core.doc.add_layer("ink", LayerBacking::Drawables);

        let first = draw_line(&mut core);
        core.finalize_stroke().expect("finalize").expect("committed");
        core.undo();
        assert!(core.doc.arena.contains(first));

        // A new commit invalidates the redo branch; the parked drawable goes.
        draw_line(&mut core);
        core.finalize_stroke().expect("finalize").expect("committed");
        assert!(!core.doc.arena.contains(first));
    }

    #[test]
    fn cancel_discards_everything() {
        let Some(mut core) = core() else { return };
        let layer = core.doc.add_layer("ink", LayerBacking::Drawables);
        let rx = core.subscribe();

        let id = draw_line(&mut core);
        core.cancel_stroke();
        assert!(!core.is_drawing());
        assert!(core.doc.arena.is_empty());
        assert!(core.doc.layer(layer).is_some_and(|l| l.paths.is_empty()));
        assert!(!core.history().can_undo());
        assert!(
            rx.try_iter()
                .any(|e| e == PipelineEvent::StrokeCancelled { stroke: id })
        );
    }

    #[test]
    fn rejects_locked_layer_and_double_start() {
        let Some(mut core) = core() else { return };
        let layer = core.doc.add_layer("ink", LayerBacking::Drawables);

        if let Some(l) = core.doc.layer_mut(layer) {
            l.locked = true;
        }
        assert!(matches!(
            core.start_stroke(Sample::at(10.0, 10.0, 0.5)),
            Err(PipelineError::LayerLocked)
        ));

        if let Some(l) = core.doc.layer_mut(layer) {
            l.locked = false;
        }
        core.start_stroke(Sample::at(10.0, 10.0, 0.5)).expect("start");
        assert!(matches!(
            core.start_stroke(Sample::at(11.0, 10.0, 0.5)),
            Err(PipelineError::InvalidState(_))
        ));
        core.cancel_stroke();
    }

    #[test]
    fn update_while_idle_is_a_no_op() {
        let Some(mut core) = core() else { return };
        core.doc.add_layer("ink", LayerBacking::Drawables);
        core.update_stroke(Sample::at(10.0, 10.0, 0.5));
        assert!(!core.is_drawing());
        assert!(matches!(
            core.finalize_stroke(),
            Err(PipelineError::InvalidState(_))
        ));
    }

    #[test]
    fn mask_erase_carves_and_undoes() {
        let Some(mut core) = core() else { return };
        let layer = core.doc.add_layer("mask", LayerBacking::RasterMask);
        let mask = crate::layer::LayerMask::new(&core.ctx.device, &core.ctx.queue, 128, 128);
        if let Some(l) = core.doc.layer_mut(layer) {
            l.mask = Some(mask);
        }

        let settings = StaticSettings {
            brush: BrushSettings {
                mode: BrushMode::Eraser,
                hardness: 1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        core.settings = Box::new(settings);

        core.start_stroke(Sample::at(40.0, 64.0, 0.8)).expect("start");
        for i in 1..=10 {
            core.update_stroke(Sample::at(40.0 + i as f32 * 5.0, 64.0, 0.8));
        }
        core.finalize_stroke().expect("finalize").expect("carved");

        let center = |core: &BrushCore| -> u8 {
            let mask = core
                .doc
                .layer(layer)
                .and_then(|l| l.mask.as_ref())
                .expect("mask");
            StrokeCompositor::readback_mask_region(&core.ctx, mask, 64, 64, 1, 1).expect("read")[0]
        };
        assert!(center(&core) < 10, "mask not carved");

        core.undo();
        assert_eq!(center(&core), 255, "undo did not restore the mask");
        core.redo();
        assert!(center(&core) < 10, "redo did not re-carve");
    }
}
