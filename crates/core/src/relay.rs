//! Narration Relay
//!
//! Drives a narration stream to completion, forwarding each fragment to a live
//! subscriber and appending it to the local narrative before pulling the next
//! one. Completion waits for the subscriber side to acknowledge end-of-stream.

use crate::error::{Error, Result};
use crate::llm_client::LLMStream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// The publish side of a live narration channel.
#[async_trait]
pub trait NarrationSink: Send + Sync {
    /// Delivers one fragment to the subscriber channel.
    async fn publish(&self, fragment: &str) -> Result<()>;

    /// Signals end-of-stream and waits until the channel acknowledges it.
    async fn finish(&self) -> Result<()>;

    /// Tells the channel the stream will not complete. Best effort.
    async fn abort(&self, _reason: &str) {}
}

/// Messages carried from a `ChannelSink` to whatever owns the live channel.
#[derive(Debug)]
pub enum NarrationEvent {
    Fragment(String),
    /// End-of-stream; the receiver acknowledges once it has recorded the end.
    End(oneshot::Sender<()>),
    Aborted(String),
}

/// A `NarrationSink` backed by a bounded `mpsc` channel.
pub struct ChannelSink {
    tx: mpsc::Sender<NarrationEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NarrationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NarrationSink for ChannelSink {
    async fn publish(&self, fragment: &str) -> Result<()> {
        self.tx
            .send(NarrationEvent::Fragment(fragment.to_string()))
            .await
            .map_err(|_| Error::DeliveryIncomplete("narration channel closed".to_string()))
    }

    async fn finish(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(NarrationEvent::End(ack_tx))
            .await
            .map_err(|_| {
                Error::DeliveryIncomplete("narration channel closed before end".to_string())
            })?;
        ack_rx.await.map_err(|_| {
            Error::DeliveryIncomplete("end of stream was not acknowledged".to_string())
        })
    }

    async fn abort(&self, reason: &str) {
        if self
            .tx
            .send(NarrationEvent::Aborted(reason.to_string()))
            .await
            .is_err()
        {
            warn!("Failed to report aborted narration: receiver dropped.");
        }
    }
}

/// Relays every fragment of `fragments` to `sink` and returns their
/// concatenation once the sink has confirmed delivery.
pub async fn relay(mut fragments: LLMStream, sink: &dyn NarrationSink) -> Result<String> {
    let mut narrative = String::new();
    let mut count = 0usize;

    while let Some(next) = fragments.next().await {
        let fragment = match next {
            Ok(fragment) => fragment,
            Err(e) => {
                sink.abort(&e.to_string()).await;
                return Err(e);
            }
        };
        if fragment.is_empty() {
            continue;
        }
        sink.publish(&fragment).await?;
        narrative.push_str(&fragment);
        count += 1;
    }

    sink.finish().await?;
    debug!(fragments = count, chars = narrative.len(), "Narration delivered");
    Ok(narrative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn stream_of(items: Vec<Result<String>>) -> LLMStream {
        Box::pin(futures::stream::iter(items))
    }

    /// Records what it receives; acknowledges `finish` unless told otherwise.
    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<String>>,
        finished: Mutex<bool>,
        aborted: Mutex<Option<String>>,
        refuse_ack: bool,
    }

    #[async_trait]
    impl NarrationSink for RecordingSink {
        async fn publish(&self, fragment: &str) -> Result<()> {
            self.published.lock().unwrap().push(fragment.to_string());
            Ok(())
        }

        async fn finish(&self) -> Result<()> {
            if self.refuse_ack {
                return Err(Error::DeliveryIncomplete("no ack".into()));
            }
            *self.finished.lock().unwrap() = true;
            Ok(())
        }

        async fn abort(&self, reason: &str) {
            *self.aborted.lock().unwrap() = Some(reason.to_string());
        }
    }

    #[tokio::test]
    async fn test_relay_preserves_order_in_both_sinks() {
        let parts = ["Once ", "upon ", "a ", "rocket."];
        let sink = RecordingSink::default();
        let narrative = relay(
            stream_of(parts.iter().map(|p| Ok(p.to_string())).collect()),
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(narrative, parts.concat());
        assert_eq!(*sink.published.lock().unwrap(), parts.to_vec());
        assert!(*sink.finished.lock().unwrap());
    }

    #[tokio::test]
    async fn test_relay_skips_empty_fragments() {
        let sink = RecordingSink::default();
        let narrative = relay(
            stream_of(vec![Ok("a".into()), Ok(String::new()), Ok("b".into())]),
            &sink,
        )
        .await
        .unwrap();
        assert_eq!(narrative, "ab");
        assert_eq!(sink.published.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_relay_fails_without_ack() {
        let sink = RecordingSink {
            refuse_ack: true,
            ..Default::default()
        };
        let err = relay(stream_of(vec![Ok("a".into())]), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeliveryIncomplete(_)));
    }

    #[tokio::test]
    async fn test_relay_aborts_sink_on_stream_error() {
        let sink = RecordingSink::default();
        let err = relay(
            stream_of(vec![
                Ok("a".into()),
                Err(Error::UpstreamUnavailable("reset".into())),
                Ok("never".into()),
            ]),
            &sink,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::UpstreamUnavailable(_)));
        assert_eq!(*sink.published.lock().unwrap(), vec!["a".to_string()]);
        assert!(sink.aborted.lock().unwrap().is_some());
        assert!(!*sink.finished.lock().unwrap());
    }

    #[tokio::test]
    async fn test_channel_sink_waits_for_ack() {
        let (sink, mut rx) = ChannelSink::new(4);
        let subscriber = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(event) = rx.recv().await {
                match event {
                    NarrationEvent::Fragment(f) => received.push(f),
                    NarrationEvent::End(ack) => {
                        let _ = ack.send(());
                        break;
                    }
                    NarrationEvent::Aborted(_) => break,
                }
            }
            received
        });

        let narrative = relay(stream_of(vec![Ok("x".into()), Ok("y".into())]), &sink)
            .await
            .unwrap();
        assert_eq!(narrative, "xy");
        assert_eq!(subscriber.await.unwrap(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_channel_sink_dropped_ack_is_delivery_incomplete() {
        let (sink, mut rx) = ChannelSink::new(4);
        tokio::spawn(async move {
            // Drain fragments but drop the acknowledgement.
            while let Some(event) = rx.recv().await {
                if let NarrationEvent::End(ack) = event {
                    drop(ack);
                }
            }
        });

        let err = relay(stream_of(vec![Ok("x".into())]), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeliveryIncomplete(_)));
    }

    #[tokio::test]
    async fn test_channel_sink_closed_receiver() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        let err = sink.publish("x").await.unwrap_err();
        assert!(matches!(err, Error::DeliveryIncomplete(_)));
    }
}
