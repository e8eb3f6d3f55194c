// ============================================================================
// EVENTS — pipeline lifecycle notifications for embedding hosts
// ============================================================================

use std::sync::mpsc::{self, Receiver, Sender};

use crate::layer::{LayerId, StrokeId};

/// Events emitted by the stroke pipeline.  Hosts subscribe to drive
/// re-rendering; the pipeline never blocks on a slow subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A preview drawable for the in-progress stroke was replaced.
    StrokePreviewing { stroke: StrokeId },
    /// A stroke was finalized and attached to a layer.
    StrokeCommitted { layer: LayerId, stroke: StrokeId },
    /// An in-progress stroke was abandoned without output.
    StrokeCancelled { stroke: StrokeId },
}

/// Fan-out hub over std mpsc channels.  Senders whose receiver has been
/// dropped are pruned on the next emit.
#[derive(Default)]
pub struct EventHub {
    senders: Vec<Sender<PipelineEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel();
        self.senders.push(tx);
        rx
    }

    pub fn emit(&mut self, event: PipelineEvent) {
        self.senders.retain(|tx| tx.send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_to_all_live_subscribers_and_prunes_dead_ones() {
        let mut hub = EventHub::new();
        let rx_a = hub.subscribe();
        let rx_b = hub.subscribe();
        let stroke = StrokeId::new();

        hub.emit(PipelineEvent::StrokeCancelled { stroke });
        assert_eq!(
            rx_a.try_recv().ok(),
            Some(PipelineEvent::StrokeCancelled { stroke })
        );
        assert_eq!(
            rx_b.try_recv().ok(),
            Some(PipelineEvent::StrokeCancelled { stroke })
        );

        drop(rx_b);
        hub.emit(PipelineEvent::StrokeCancelled { stroke });
        assert_eq!(hub.subscriber_count(), 1);
        assert!(rx_a.try_recv().is_ok());
    }
}
