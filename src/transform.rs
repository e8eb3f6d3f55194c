// ============================================================================
// TRANSFORMS — nested 2D affine hierarchy + device→local coordinate resolver
// ============================================================================

use std::collections::HashMap;

use uuid::Uuid;

use crate::log_warn;

/// Maximum parent-chain depth.  A chain deeper than this (or a cycle, which
/// looks the same to the walker) is a configuration error, not a crash.
pub const MAX_CHAIN_DEPTH: usize = 20;

// ============================================================================
// AFFINE MATRIX
// ============================================================================

/// Row form of a 2D affine transform:
///   x' = a*x + c*y + tx
///   y' = b*x + d*y + ty
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat2d {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Mat2d {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self {
            tx,
            ty,
            ..Self::identity()
        }
    }

    /// `self * other` — applies `other` first, then `self`.
    pub fn multiply(&self, other: &Mat2d) -> Mat2d {
        Mat2d {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            tx: self.a * other.tx + self.c * other.ty + self.tx,
            ty: self.b * other.tx + self.d * other.ty + self.ty,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    /// Inverse, or `None` when the determinant is zero or any component of
    /// the result would be non-finite.
    pub fn invert(&self) -> Option<Mat2d> {
        let det = self.a * self.d - self.b * self.c;
        if !det.is_finite() || det == 0.0 {
            return None;
        }
        let inv_det = 1.0 / det;
        let out = Mat2d {
            a: self.d * inv_det,
            b: -self.b * inv_det,
            c: -self.c * inv_det,
            d: self.a * inv_det,
            tx: (self.c * self.ty - self.d * self.tx) * inv_det,
            ty: (self.b * self.tx - self.a * self.ty) * inv_det,
        };
        if out.is_finite() { Some(out) } else { None }
    }

    pub fn is_finite(&self) -> bool {
        self.a.is_finite()
            && self.b.is_finite()
            && self.c.is_finite()
            && self.d.is_finite()
            && self.tx.is_finite()
            && self.ty.is_finite()
    }
}

// ============================================================================
// TRANSFORM NODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

impl NodeId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// One link (camera, layer, or intermediate container) in the nesting chain.
#[derive(Clone, Copy, Debug)]
pub struct TransformNode {
    pub position: (f32, f32),
    pub scale: (f32, f32),
    pub rotation: f32,
    pub pivot: (f32, f32),
    pub parent: Option<NodeId>,
}

impl Default for TransformNode {
    fn default() -> Self {
        Self {
            position: (0.0, 0.0),
            scale: (1.0, 1.0),
            rotation: 0.0,
            pivot: (0.0, 0.0),
            parent: None,
        }
    }
}

impl TransformNode {
    /// Local-to-parent matrix: translate(position + pivot) · rotate · scale ·
    /// translate(-pivot).
    pub fn local_matrix(&self) -> Mat2d {
        let (sin, cos) = self.rotation.sin_cos();
        let rs = Mat2d {
            a: cos * self.scale.0,
            b: sin * self.scale.0,
            c: -sin * self.scale.1,
            d: cos * self.scale.1,
            tx: 0.0,
            ty: 0.0,
        };
        let t = Mat2d::translation(self.position.0 + self.pivot.0, self.position.1 + self.pivot.1);
        t.multiply(&rs)
            .multiply(&Mat2d::translation(-self.pivot.0, -self.pivot.1))
    }

    /// Parent-to-local, applied field by field: undo translation, then
    /// rotation, then scale, then pivot.  Used as the fallback when the
    /// matrix inverse is unavailable, and for the chain walker.
    pub fn apply_inverse(&self, x: f32, y: f32) -> (f32, f32) {
        let dx = x - self.position.0 - self.pivot.0;
        let dy = y - self.position.1 - self.pivot.1;
        let (sin, cos) = self.rotation.sin_cos();
        let rx = cos * dx + sin * dy;
        let ry = -sin * dx + cos * dy;
        // A zero scale axis cannot be undone; treat it as 1 so the point
        // stays finite instead of blowing up to infinity.
        let sx = if self.scale.0 != 0.0 { self.scale.0 } else { 1.0 };
        let sy = if self.scale.1 != 0.0 { self.scale.1 } else { 1.0 };
        (rx / sx + self.pivot.0, ry / sy + self.pivot.1)
    }

    /// Local-to-parent, field by field (exact inverse of `apply_inverse`).
    pub fn apply_forward(&self, x: f32, y: f32) -> (f32, f32) {
        let px = (x - self.pivot.0) * self.scale.0;
        let py = (y - self.pivot.1) * self.scale.1;
        let (sin, cos) = self.rotation.sin_cos();
        let rx = cos * px - sin * py;
        let ry = sin * px + cos * py;
        (
            rx + self.position.0 + self.pivot.0,
            ry + self.position.1 + self.pivot.1,
        )
    }
}

/// ID-keyed node arena.  Parent links are IDs rather than references, so a
/// malformed cycle degrades into a depth-capped walk instead of leaking or
/// recursing forever.
pub struct TransformTree {
    nodes: HashMap<NodeId, TransformNode>,
    root: NodeId,
    /// Bumped on every mutation; resolver caches key off this.
    generation: u64,
}

impl TransformTree {
    /// Create a tree whose root is the camera/world node.
    pub fn new(root_node: TransformNode) -> Self {
        let root = NodeId::new();
        let mut nodes = HashMap::new();
        nodes.insert(root, TransformNode {
            parent: None,
            ..root_node
        });
        Self {
            nodes,
            root,
            generation: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn insert(&mut self, node: TransformNode) -> NodeId {
        let id = NodeId::new();
        let parent = node.parent.or(Some(self.root));
        self.nodes.insert(id, TransformNode { parent, ..node });
        self.generation += 1;
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&TransformNode> {
        self.nodes.get(&id)
    }

    /// Replace a node's transform fields (parent link unchanged).
    pub fn update(&mut self, id: NodeId, f: impl FnOnce(&mut TransformNode)) {
        if let Some(node) = self.nodes.get_mut(&id) {
            f(node);
            self.generation += 1;
        }
    }

    /// Nodes from `id` up to (but excluding) the root, leaf first.  The
    /// second value is `true` when the walk hit the depth cap before
    /// reaching the root.
    pub fn chain_to_root(&self, id: NodeId) -> (Vec<NodeId>, bool) {
        let mut chain = Vec::new();
        let mut cur = id;
        while cur != self.root {
            if chain.len() >= MAX_CHAIN_DEPTH {
                return (chain, true);
            }
            match self.nodes.get(&cur) {
                Some(node) => {
                    chain.push(cur);
                    match node.parent {
                        Some(p) => cur = p,
                        None => break, // detached subtree; treat its top as root
                    }
                }
                None => break,
            }
        }
        (chain, false)
    }

    /// Cumulative root matrix (the camera/world transform).
    pub fn root_matrix(&self) -> Mat2d {
        self.nodes
            .get(&self.root)
            .map(|n| n.local_matrix())
            .unwrap_or_else(Mat2d::identity)
    }
}

// ============================================================================
// SURFACE METRICS
// ============================================================================

/// Live geometry of the drawing surface in the host window.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceMetrics {
    /// Top-left of the surface in client (window) coordinates.
    pub left: f32,
    pub top: f32,
    /// Displayed size in client coordinates.
    pub width: f32,
    pub height: f32,
    /// Backing canvas resolution.
    pub canvas_width: f32,
    pub canvas_height: f32,
}

impl SurfaceMetrics {
    pub fn is_sized(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.canvas_width > 0.0 && self.canvas_height > 0.0
    }
}

// ============================================================================
// COORDINATE RESOLVER
// ============================================================================

/// Maps device pointer samples through the camera → surface → layer chain
/// into the local space of the layer receiving input.
///
/// Every output is checked for non-finite values; a bad result yields the
/// previous valid coordinate instead, so NaN never reaches geometry.
pub struct CoordinateResolver {
    surface: SurfaceMetrics,
    last_valid: (f32, f32),
    cached_root_inverse: Option<Mat2d>,
    cached_generation: Option<u64>,
}

impl CoordinateResolver {
    pub fn new(surface: SurfaceMetrics) -> Self {
        Self {
            surface,
            last_valid: (0.0, 0.0),
            cached_root_inverse: None,
            cached_generation: None,
        }
    }

    /// Update the surface rectangle (e.g. on resize).  Invalidates the
    /// cached root inverse.
    pub fn set_surface(&mut self, surface: SurfaceMetrics) {
        self.surface = surface;
        self.cached_root_inverse = None;
        self.cached_generation = None;
    }

    /// Client coordinates → canvas pixels, correcting for viewport scaling.
    /// `None` while the surface is not yet sized.  Never returns NaN.
    pub fn screen_to_canvas(&mut self, client_x: f32, client_y: f32) -> Option<(f32, f32)> {
        if !self.surface.is_sized() {
            return None;
        }
        let x = (client_x - self.surface.left) * (self.surface.canvas_width / self.surface.width);
        let y = (client_y - self.surface.top) * (self.surface.canvas_height / self.surface.height);
        if x.is_finite() && y.is_finite() {
            Some(self.remember((x, y)))
        } else {
            Some(self.last_valid)
        }
    }

    /// Canvas → world via the inverse of the root (camera) matrix.  Falls
    /// back to the manual field-by-field inverse when the matrix inverse is
    /// unavailable or non-finite.
    pub fn canvas_to_world(&mut self, tree: &TransformTree, x: f32, y: f32) -> (f32, f32) {
        if self.cached_generation != Some(tree.generation()) {
            self.cached_root_inverse = tree.root_matrix().invert();
            self.cached_generation = Some(tree.generation());
        }
        let out = match self.cached_root_inverse {
            Some(inv) => inv.apply(x, y),
            None => match tree.node(tree.root()) {
                Some(root) => root.apply_inverse(x, y),
                None => (x, y),
            },
        };
        self.guard(out)
    }

    /// World → local space of `target`, applying each chain node's inverse
    /// in root-to-leaf order.  A chain that exceeds the depth cap is logged
    /// and the best value computed so far is returned.
    pub fn world_to_local(
        &mut self,
        tree: &TransformTree,
        x: f32,
        y: f32,
        target: NodeId,
    ) -> (f32, f32) {
        let (chain, truncated) = tree.chain_to_root(target);
        if truncated {
            log_warn!(
                "transform chain exceeds depth cap {} (cycle?); using partial resolution",
                MAX_CHAIN_DEPTH
            );
        }
        let mut p = (x, y);
        for id in chain.iter().rev() {
            if let Some(node) = tree.node(*id) {
                let next = node.apply_inverse(p.0, p.1);
                if next.0.is_finite() && next.1.is_finite() {
                    p = next;
                } else {
                    break; // keep the best value computed so far
                }
            }
        }
        self.guard(p)
    }

    /// Exact inverse composition of `world_to_local` (round-trip validation).
    pub fn local_to_world(
        &mut self,
        tree: &TransformTree,
        x: f32,
        y: f32,
        node: NodeId,
    ) -> (f32, f32) {
        let (chain, truncated) = tree.chain_to_root(node);
        if truncated {
            log_warn!(
                "transform chain exceeds depth cap {} (cycle?); using partial resolution",
                MAX_CHAIN_DEPTH
            );
        }
        let mut p = (x, y);
        for id in chain.iter() {
            if let Some(n) = tree.node(*id) {
                let next = n.apply_forward(p.0, p.1);
                if next.0.is_finite() && next.1.is_finite() {
                    p = next;
                } else {
                    break;
                }
            }
        }
        self.guard(p)
    }

    /// Full device → local resolution for one pointer sample.
    pub fn resolve(
        &mut self,
        tree: &TransformTree,
        client_x: f32,
        client_y: f32,
        target: NodeId,
    ) -> Option<(f32, f32)> {
        let (cx, cy) = self.screen_to_canvas(client_x, client_y)?;
        let (wx, wy) = self.canvas_to_world(tree, cx, cy);
        Some(self.world_to_local(tree, wx, wy, target))
    }

    fn guard(&mut self, candidate: (f32, f32)) -> (f32, f32) {
        if candidate.0.is_finite() && candidate.1.is_finite() {
            self.remember(candidate)
        } else {
            self.last_valid
        }
    }

    fn remember(&mut self, p: (f32, f32)) -> (f32, f32) {
        self.last_valid = p;
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

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

    fn node(px: f32, py: f32, s: f32, rot: f32, pivot: (f32, f32)) -> TransformNode {
        TransformNode {
            position: (px, py),
            scale: (s, s),
            rotation: rot,
            pivot,
            parent: None,
        }
    }

    #[test]
    fn matrix_inverse_round_trip() {
        let m = node(5.0, -3.0, 2.0, 0.7, (4.0, 1.0)).local_matrix();
        let inv = m.invert().unwrap();
        let (x, y) = inv.apply(m.apply(13.0, -7.0).0, m.apply(13.0, -7.0).1);
        assert!((x - 13.0).abs() < EPS && (y + 7.0).abs() < EPS);
    }

    #[test]
    fn manual_inverse_matches_matrix_inverse() {
        let n = node(5.0, -3.0, 2.0, 0.7, (4.0, 1.0));
        let inv = n.local_matrix().invert().unwrap();
        let (mx, my) = inv.apply(10.0, 20.0);
        let (fx, fy) = n.apply_inverse(10.0, 20.0);
        assert!((mx - fx).abs() < EPS && (my - fy).abs() < EPS);
    }

    #[test]
    fn world_local_round_trip_deep_chain() {
        let mut tree = TransformTree::new(node(3.0, 4.0, 1.5, 0.2, (10.0, 10.0)));
        let mut resolver = CoordinateResolver::new(surface());
        let mut parent = tree.root();
        let mut leaf = parent;
        for i in 0..MAX_CHAIN_DEPTH - 1 {
            let mut n = node(
                i as f32 * 2.0 - 7.0,
                1.0 + i as f32,
                1.0 + (i as f32) * 0.01,
                0.1 * i as f32,
                (i as f32, -(i as f32)),
            );
            n.parent = Some(parent);
            leaf = tree.insert(n);
            parent = leaf;
        }
        let (wx, wy) = resolver.local_to_world(&tree, 12.0, -5.0, leaf);
        let (lx, ly) = resolver.world_to_local(&tree, wx, wy, leaf);
        assert!((lx - 12.0).abs() < 0.01, "lx = {}", lx);
        assert!((ly + 5.0).abs() < 0.01, "ly = {}", ly);
    }

    #[test]
    fn unsized_surface_yields_none() {
        let mut resolver = CoordinateResolver::new(SurfaceMetrics {
            left: 0.0,
            top: 0.0,
            width: 0.0,
            height: 0.0,
            canvas_width: 800.0,
            canvas_height: 600.0,
        });
        assert!(resolver.screen_to_canvas(100.0, 100.0).is_none());
    }

    #[test]
    fn zero_scale_falls_back_without_nan() {
        let mut tree = TransformTree::new(node(0.0, 0.0, 0.0, 0.0, (0.0, 0.0)));
        let mut resolver = CoordinateResolver::new(surface());
        // Singular camera matrix: inverse is unavailable, fallback must
        // still produce a finite point.
        let (x, y) = resolver.canvas_to_world(&tree, 10.0, 10.0);
        assert!(x.is_finite() && y.is_finite());
        tree.update(tree.root(), |n| n.scale = (2.0, 2.0));
        let (x2, y2) = resolver.canvas_to_world(&tree, 10.0, 10.0);
        assert!((x2 - 5.0).abs() < EPS && (y2 - 5.0).abs() < EPS);
    }

    #[test]
    fn cyclic_chain_terminates() {
        let mut tree = TransformTree::new(TransformNode::default());
        let a = tree.insert(TransformNode::default());
        let b = tree.insert(TransformNode {
            parent: Some(a),
            ..TransformNode::default()
        });
        // Deliberately corrupt the tree: a's parent becomes b.
        tree.update(a, |n| n.parent = Some(b));
        let (chain, truncated) = tree.chain_to_root(a);
        assert!(truncated);
        assert_eq!(chain.len(), MAX_CHAIN_DEPTH);
        // The resolver must still return something finite.
        let mut resolver = CoordinateResolver::new(surface());
        let (x, y) = resolver.world_to_local(&tree, 1.0, 2.0, a);
        assert!(x.is_finite() && y.is_finite());
    }

    #[test]
    fn viewport_scaling_applied() {
        let mut resolver = CoordinateResolver::new(SurfaceMetrics {
            left: 10.0,
            top: 20.0,
            width: 400.0,
            height: 300.0,
            canvas_width: 800.0,
            canvas_height: 600.0,
        });
        let (x, y) = resolver.screen_to_canvas(210.0, 170.0).unwrap();
        assert!((x - 400.0).abs() < EPS);
        assert!((y - 300.0).abs() < EPS);
    }
}
