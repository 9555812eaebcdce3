use crate::data_structures::RequestId;
use crate::error::SwapError;
use tokio::sync::mpsc;

/// Events emitted by the router and settlement engine. Consumers pull them
/// off an unbounded channel; emission never blocks protocol logic.
#[derive(Clone, Debug)]
pub enum MetricEvent {
    SwapSettled { request_id: RequestId, amount_out: u128 },
    SwapRefunded { request_id: RequestId, reason: Option<SwapError> },
    SwapFrozen { request_id: RequestId },
    PacketResent { request_id: RequestId },
    PoolSwapApplied { pair: String, amount_in: u128, amount_out: u128 },
}

pub type MetricsSender = mpsc::UnboundedSender<MetricEvent>;
pub type MetricsReceiver = mpsc::UnboundedReceiver<MetricEvent>;

pub fn metrics_channel() -> (MetricsSender, MetricsReceiver) {
    mpsc::unbounded_channel()
}

/// Aggregated counters over a drained event stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsCollector {
    pub settled: usize,
    pub refunded: usize,
    pub frozen: usize,
    pub resent: usize,
    pub pool_swaps: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record(&mut self, event: &MetricEvent) {
        match event {
            MetricEvent::SwapSettled { .. } => self.settled += 1,
            MetricEvent::SwapRefunded { .. } => self.refunded += 1,
            MetricEvent::SwapFrozen { .. } => self.frozen += 1,
            MetricEvent::PacketResent { .. } => self.resent += 1,
            MetricEvent::PoolSwapApplied { .. } => self.pool_swaps += 1,
        }
    }

    /// Drain everything currently queued on the receiver without waiting.
    pub fn drain(&mut self, rx: &mut MetricsReceiver) {
        while let Ok(event) = rx.try_recv() {
            self.record(&event);
        }
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "settled": self.settled,
            "refunded": self.refunded,
            "frozen": self.frozen,
            "resent": self.resent,
            "pool_swaps": self.pool_swaps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::TokenId;

    #[test]
    fn collector_counts_events() {
        let (tx, mut rx) = metrics_channel();
        let id = RequestId::derive(1, "a", &TokenId::new("X"), 1, 2, &TokenId::new("Y"), "b", 0);
        tx.send(MetricEvent::SwapSettled { request_id: id, amount_out: 5 }).unwrap();
        tx.send(MetricEvent::SwapRefunded { request_id: id, reason: None }).unwrap();
        tx.send(MetricEvent::PacketResent { request_id: id }).unwrap();
        tx.send(MetricEvent::PacketResent { request_id: id }).unwrap();

        let mut collector = MetricsCollector::new();
        collector.drain(&mut rx);
        assert_eq!(collector.settled, 1);
        assert_eq!(collector.refunded, 1);
        assert_eq!(collector.resent, 2);
        assert_eq!(collector.summary()["resent"], 2);
    }
}
