use log::{info, warn};
use tokio::sync::mpsc;

use crate::event::types::Event;

/// Telemetry sink. Delivery is fire-and-forget.
pub trait Channel: Send + Sync {
    fn send(&self, event: Event);
}

/// Discards everything.
#[derive(Debug, Default, Clone)]
pub struct DummyChannel;

impl Channel for DummyChannel {
    fn send(&self, _event: Event) {}
}

/// Writes every event as one JSON log line.
#[derive(Debug, Default, Clone)]
pub struct LogChannel;

impl Channel for LogChannel {
    fn send(&self, event: Event) {
        match event.to_json() {
            Ok(line) => info!("[event] {}", line),
            Err(e) => warn!("[event] Unable to render event: {}", e),
        }
    }
}

/// Bounded in-process queue. Events are dropped when the queue is full or
/// the receiver is gone.
#[derive(Debug, Clone)]
pub struct QueueChannel {
    tx: mpsc::Sender<Event>,
}

impl QueueChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (QueueChannel { tx }, rx)
    }
}

impl Channel for QueueChannel {
    fn send(&self, event: Event) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("[event] Dropping event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types::{SENSOR_CONNECTION, CONNECTION_OPENED};

    #[tokio::test]
    async fn queue_channel_delivers_in_order() {
        let (channel, mut rx) = QueueChannel::new(4);
        for i in 0..3i64 {
            channel.send(Event::builder(SENSOR_CONNECTION, CONNECTION_OPENED).with("seq", i).build());
        }

        for i in 0..3i64 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.get("seq").and_then(|v| v.as_number()), Some(i));
        }
    }

    #[tokio::test]
    async fn queue_channel_drops_when_full() {
        let (channel, mut rx) = QueueChannel::new(1);
        channel.send(Event::builder(SENSOR_CONNECTION, CONNECTION_OPENED).build());
        channel.send(Event::builder(SENSOR_CONNECTION, CONNECTION_OPENED).build());

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sinks_are_usable_as_trait_objects() {
        let sinks: Vec<Box<dyn Channel>> = vec![Box::new(DummyChannel), Box::new(LogChannel)];
        for sink in &sinks {
            sink.send(Event::builder(SENSOR_CONNECTION, CONNECTION_OPENED).build());
        }
    }
}
