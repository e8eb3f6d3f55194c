// ============================================================================
// LAYERS & DOCUMENT — attach targets for committed strokes
// ============================================================================
//
// The pipeline does not own layer semantics (blend modes, grouping, etc.);
// it only needs an ordered path list to attach drawables to, a lock flag to
// respect, and — for mask-backed layers — the persistent coverage mask that
// eraser strokes subtract from.

use std::collections::HashMap;

use uuid::Uuid;

use crate::gpu::compositor::StrokeDrawable;
use crate::transform::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Uuid);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrokeId(Uuid);

impl StrokeId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// How a layer stores its content, which decides how erasing works:
/// drawable-backed layers receive subtractive eraser drawables, mask-backed
/// layers get their persistent mask carved directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerBacking {
    Drawables,
    RasterMask,
}

// ============================================================================
// LAYER MASK
// ============================================================================

/// Persistent single-channel coverage mask for `LayerBacking::RasterMask`.
pub struct LayerMask {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl LayerMask {
    /// Create a mask filled fully opaque.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("layer_mask"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let filled = vec![0xFFu8; (width * height) as usize];
        let mask = Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            texture,
            width,
            height,
        };
        mask.write_region(queue, 0, 0, width, height, &filled);
        mask
    }

    /// Upload `width * height` R8 texels into the region at `(x, y)`.
    pub fn write_region(
        &self,
        queue: &wgpu::Queue,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        debug_assert_eq!(data.len(), (width * height) as usize);
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Clamp a canvas-space rect to the mask, returning `(x, y, w, h)` in
    /// texels, or `None` when the rect lies entirely outside.
    pub fn clamp_rect(&self, bounds: &crate::geometry::Bounds) -> Option<(u32, u32, u32, u32)> {
        let min_x = (bounds.min_x.floor().max(0.0) as u32).min(self.width);
        let min_y = (bounds.min_y.floor().max(0.0) as u32).min(self.height);
        let max_x = (bounds.max_x.ceil().max(0.0) as u32).min(self.width);
        let max_y = (bounds.max_y.ceil().max(0.0) as u32).min(self.height);
        let w = max_x.saturating_sub(min_x);
        let h = max_y.saturating_sub(min_y);
        if w == 0 || h == 0 {
            None
        } else {
            Some((min_x, min_y, w, h))
        }
    }
}

// ============================================================================
// LAYER
// ============================================================================

pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub backing: LayerBacking,
    /// Transform node this layer hangs off, if the host nests it.
    pub transform: Option<NodeId>,
    /// Ordered drawable entries, bottom to top.
    pub paths: Vec<StrokeId>,
    /// Present iff `backing == RasterMask`.
    pub mask: Option<LayerMask>,
}

impl Layer {
    pub fn new(name: impl Into<String>, backing: LayerBacking) -> Self {
        Self {
            id: LayerId(Uuid::new_v4()),
            name: name.into(),
            visible: true,
            locked: false,
            backing,
            transform: None,
            paths: Vec::new(),
            mask: None,
        }
    }

    pub fn attach(&mut self, stroke: StrokeId) {
        self.paths.push(stroke);
    }

    /// Remove the entry; `true` when it was present.
    pub fn detach(&mut self, stroke: StrokeId) -> bool {
        match self.paths.iter().rposition(|&s| s == stroke) {
            Some(i) => {
                self.paths.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, stroke: StrokeId) -> bool {
        self.paths.contains(&stroke)
    }
}

// ============================================================================
// STROKE ARENA
// ============================================================================

/// A committed stroke and the drawable produced for it.
pub struct CommittedStroke {
    pub stroke: StrokeId,
    pub layer: LayerId,
    pub drawable: StrokeDrawable,
}

/// Committed strokes keyed by stable ID.  History commands store IDs and
/// look entries up here, so no command ever captures a live drawable.
#[derive(Default)]
pub struct StrokeArena {
    entries: HashMap<StrokeId, CommittedStroke>,
}

impl StrokeArena {
    pub fn insert(&mut self, entry: CommittedStroke) {
        self.entries.insert(entry.stroke, entry);
    }

    /// Dropping the returned entry releases its GPU texture.
    pub fn remove(&mut self, id: StrokeId) -> Option<CommittedStroke> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: StrokeId) -> Option<&CommittedStroke> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: StrokeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// The layer stack plus the stroke arena.  This is the state that history
/// commands mutate.
#[derive(Default)]
pub struct Document {
    pub layers: Vec<Layer>,
    pub active: Option<LayerId>,
    pub arena: StrokeArena,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, name: impl Into<String>, backing: LayerBacking) -> LayerId {
        let layer = Layer::new(name, backing);
        let id = layer.id;
        self.layers.push(layer);
        if self.active.is_none() {
            self.active = Some(id);
        }
        id
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active.and_then(|id| self.layer(id))
    }

    pub fn set_active(&mut self, id: LayerId) {
        if self.layer(id).is_some() {
            self.active = Some(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_detach_keeps_order() {
        let mut layer = Layer::new("ink", LayerBacking::Drawables);
        let a = StrokeId::new();
        let b = StrokeId::new();
        let c = StrokeId::new();
        layer.attach(a);
        layer.attach(b);
        layer.attach(c);
        assert!(layer.detach(b));
        assert_eq!(layer.paths, vec![a, c]);
        assert!(!layer.detach(b));
    }

    #[test]
    fn first_layer_becomes_active() {
        let mut doc = Document::new();
        assert!(doc.active_layer().is_none());
        let id = doc.add_layer("base", LayerBacking::Drawables);
        assert_eq!(doc.active, Some(id));
        let second = doc.add_layer("top", LayerBacking::RasterMask);
        assert_eq!(doc.active, Some(id));
        doc.set_active(second);
        assert_eq!(doc.active_layer().map(|l| l.id), Some(second));
    }
}
