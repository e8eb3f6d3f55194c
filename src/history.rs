use std::collections::VecDeque;
use std::sync::Arc;

use crate::layer::{Document, LayerId, StrokeId};
use crate::log_warn;

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// Trait for undoable/redoable commands.
///
/// Commands mutate the [`Document`] by ID lookup only; none of them hold a
/// live drawable or layer reference, so stale commands degrade to no-ops
/// instead of dangling.
pub trait Command: Send + Sync {
    fn undo(&self, doc: &mut Document);
    fn redo(&self, doc: &mut Document);
    /// Called when the command is discarded from the redo stack without ever
    /// being redone — its chance to release resources it parked for redo.
    fn forget(&self, _doc: &mut Document) {}
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

// ============================================================================
// COMMIT STROKE COMMAND — attach/detach a committed drawable
// ============================================================================

/// Records the commit of one stroke drawable to a layer.
///
/// Undo detaches the entry from the layer's path list but leaves the
/// drawable parked in the arena so redo can re-attach it without a GPU
/// round-trip.  The parked entry is only dropped via `forget`, when a new
/// commit invalidates the redo branch.
pub struct CommitStrokeCommand {
    layer: LayerId,
    stroke: StrokeId,
    description: String,
    /// Approximate drawable footprint, captured at commit time.
    drawable_bytes: usize,
}

impl CommitStrokeCommand {
    pub fn new(
        layer: LayerId,
        stroke: StrokeId,
        description: String,
        drawable_bytes: usize,
    ) -> Self {
        Self {
            layer,
            stroke,
            description,
            drawable_bytes,
        }
    }
}

impl Command for CommitStrokeCommand {
    fn undo(&self, doc: &mut Document) {
        match doc.layer_mut(self.layer) {
            Some(layer) => {
                if !layer.detach(self.stroke) {
                    log_warn!("undo commit: stroke {:?} not attached", self.stroke);
                }
            }
            None => log_warn!("undo commit: layer {:?} no longer exists", self.layer),
        }
    }

    fn redo(&self, doc: &mut Document) {
        if !doc.arena.contains(self.stroke) {
            log_warn!("redo commit: stroke {:?} missing from arena", self.stroke);
            return;
        }
        match doc.layer_mut(self.layer) {
            Some(layer) => {
                if !layer.contains(self.stroke) {
                    layer.attach(self.stroke);
                }
            }
            None => log_warn!("redo commit: layer {:?} no longer exists", self.layer),
        }
    }

    fn forget(&self, doc: &mut Document) {
        // Parked (detached) drawables are unreachable once the redo branch
        // dies; drop them so their textures are released.
        let attached = doc
            .layer(self.layer)
            .map(|l| l.contains(self.stroke))
            .unwrap_or(false);
        if !attached {
            doc.arena.remove(self.stroke);
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.drawable_bytes
    }
}

// ============================================================================
// MASK ERASE COMMAND — patch-based undo for mask-backed layers
// ============================================================================

/// Before/after pixel patches of the region an eraser stroke carved out of a
/// layer's persistent mask.  Stores only the affected rect, not the full
/// mask.
pub struct MaskEraseCommand {
    layer: LayerId,
    queue: Arc<wgpu::Queue>,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    before: Vec<u8>,
    after: Vec<u8>,
    description: String,
}

impl MaskEraseCommand {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        layer: LayerId,
        queue: Arc<wgpu::Queue>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        before: Vec<u8>,
        after: Vec<u8>,
        description: String,
    ) -> Self {
        debug_assert_eq!(before.len(), (width * height) as usize);
        debug_assert_eq!(after.len(), (width * height) as usize);
        Self {
            layer,
            queue,
            x,
            y,
            width,
            height,
            before,
            after,
            description,
        }
    }

    fn apply(&self, doc: &mut Document, pixels: &[u8]) {
        let Some(layer) = doc.layer_mut(self.layer) else {
            log_warn!("mask erase: layer {:?} no longer exists", self.layer);
            return;
        };
        let Some(mask) = layer.mask.as_ref() else {
            log_warn!("mask erase: layer {:?} has no mask", self.layer);
            return;
        };
        mask.write_region(&self.queue, self.x, self.y, self.width, self.height, pixels);
    }
}

impl Command for MaskEraseCommand {
    fn undo(&self, doc: &mut Document) {
        self.apply(doc, &self.before);
    }

    fn redo(&self, doc: &mut Document) {
        self.apply(doc, &self.after);
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.before.len() + self.after.len()
    }
}

// ============================================================================
// HISTORY MANAGER - Manages undo/redo stacks with memory limits
// ============================================================================

/// Undo/redo history manager with memory limits.
pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
        }
    }

    pub fn push(&mut self, doc: &mut Document, command: Box<dyn Command>) {
        // A new action invalidates the redo branch; give each abandoned
        // command a chance to release parked resources.
        for cmd in self.redo_stack.drain(..).collect::<Vec<_>>() {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
            cmd.forget(doc);
        }

        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);

        self.prune();
    }

    pub fn undo(&mut self, doc: &mut Document) -> Option<String> {
        if let Some(command) = self.undo_stack.pop_back() {
            let description = command.description();
            command.undo(doc);
            self.redo_stack.push_back(command);
            Some(description)
        } else {
            None
        }
    }

    pub fn redo(&mut self, doc: &mut Document) -> Option<String> {
        if let Some(command) = self.redo_stack.pop_back() {
            let description = command.description();
            command.redo(doc);
            self.undo_stack.push_back(command);
            Some(description)
        } else {
            None
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|c| c.description())
    }

    /// Get all undo descriptions (most recent first)
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack
            .iter()
            .rev()
            .map(|c| c.description())
            .collect()
    }

    /// Get the current memory usage of the history (O(1) via cached total)
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Prune old commands to stay within limits
    fn prune(&mut self) {
        // Prune by count
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        // Prune by memory if limit is set
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }

    pub fn clear(&mut self, doc: &mut Document) {
        for cmd in self.redo_stack.drain(..).collect::<Vec<_>>() {
            cmd.forget(doc);
        }
        self.undo_stack.clear();
        self.total_memory = 0;
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCommand {
        undos: Arc<AtomicUsize>,
        redos: Arc<AtomicUsize>,
        forgets: Arc<AtomicUsize>,
        bytes: usize,
    }

    impl Command for CountingCommand {
        fn undo(&self, _doc: &mut Document) {
            self.undos.fetch_add(1, Ordering::SeqCst);
        }
        fn redo(&self, _doc: &mut Document) {
            self.redos.fetch_add(1, Ordering::SeqCst);
        }
        fn forget(&self, _doc: &mut Document) {
            self.forgets.fetch_add(1, Ordering::SeqCst);
        }
        fn description(&self) -> String {
            "count".into()
        }
        fn memory_size(&self) -> usize {
            self.bytes
        }
    }

    fn counting(bytes: usize) -> (Box<CountingCommand>, [Arc<AtomicUsize>; 3]) {
        let undos = Arc::new(AtomicUsize::new(0));
        let redos = Arc::new(AtomicUsize::new(0));
        let forgets = Arc::new(AtomicUsize::new(0));
        (
            Box::new(CountingCommand {
                undos: undos.clone(),
                redos: redos.clone(),
                forgets: forgets.clone(),
                bytes,
            }),
            [undos, redos, forgets],
        )
    }

    #[test]
    fn undo_redo_round_trip() {
        let mut doc = Document::new();
        let mut history = HistoryManager::new(10);
        let (cmd, [undos, redos, _]) = counting(8);
        history.push(&mut doc, cmd);

        assert!(history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.undo(&mut doc).as_deref(), Some("count"));
        assert_eq!(undos.load(Ordering::SeqCst), 1);
        assert!(history.can_redo());
        assert_eq!(history.redo(&mut doc).as_deref(), Some("count"));
        assert_eq!(redos.load(Ordering::SeqCst), 1);
        assert!(history.redo(&mut doc).is_none());
    }

    #[test]
    fn push_forgets_abandoned_redo_branch() {
        let mut doc = Document::new();
        let mut history = HistoryManager::new(10);
        let (first, [_, _, forgets]) = counting(8);
        history.push(&mut doc, first);
        history.undo(&mut doc);

        let (second, _) = counting(8);
        history.push(&mut doc, second);
        assert_eq!(forgets.load(Ordering::SeqCst), 1);
        assert!(!history.can_redo());
    }

    #[test]
    fn prunes_by_count_and_memory() {
        let mut doc = Document::new();
        let mut history = HistoryManager::new(3);
        for _ in 0..5 {
            let (cmd, _) = counting(8);
            history.push(&mut doc, cmd);
        }
        assert_eq!(history.undo_count(), 3);

        let mut history = HistoryManager::new(100);
        history.max_memory_bytes = Some(30);
        for _ in 0..5 {
            let (cmd, _) = counting(10);
            history.push(&mut doc, cmd);
        }
        // Pruned down to the cap, always keeping at least one entry.
        assert!(history.memory_usage() <= 30);
        assert!(history.undo_count() >= 1);
    }
}
