// Async stream view over a line signal
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use procline_core::application::{LineSignal, Subscription};

/// Lines of one output stream as a `Stream<Item = String>`
///
/// The stream subscribes while it is alive and ends after the end-of-stream
/// terminator. Dropping it unsubscribes, which may detach the signal.
///
/// # Example
/// ```text
/// let mut lines = process.output_lines();
/// process.start().await?;
/// while let Some(line) = lines.next().await {
///     println!("{line}");
/// }
/// ```
pub struct LineStream {
    lines: UnboundedReceiverStream<String>,
    _subscription: Subscription,
}

impl LineStream {
    pub(crate) fn subscribe(signal: &LineSignal) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let sender = Arc::new(Mutex::new(Some(tx)));

        let forward = sender.clone();
        let subscription = signal.subscribe(move |line| {
            let mut slot = forward.lock().unwrap_or_else(|e| e.into_inner());
            match line {
                Some(line) => {
                    if let Some(tx) = slot.as_ref() {
                        let _ = tx.send(line.to_string());
                    }
                }
                // Terminator: dropping the sender ends the stream
                None => {
                    slot.take();
                }
            }
        });

        // Reader already finished before we subscribed
        if signal.is_closed() {
            sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        }

        Self {
            lines: UnboundedReceiverStream::new(rx),
            _subscription: subscription,
        }
    }
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        Pin::new(&mut self.lines).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_yields_lines_then_ends() {
        let signal = LineSignal::new("stdout");
        let stream = LineStream::subscribe(&signal);
        assert!(signal.is_attached());

        signal.publish(Some("a"));
        signal.publish(Some("b"));
        signal.publish(None);

        let lines: Vec<String> = stream.collect().await;
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stream_on_closed_signal_is_empty() {
        let signal = LineSignal::new("stderr");
        signal.publish(None);

        let lines: Vec<String> = LineStream::subscribe(&signal).collect().await;
        assert!(lines.is_empty());
    }

    #[test]
    fn test_dropping_stream_detaches() {
        let signal = LineSignal::new("stdout");
        let stream = LineStream::subscribe(&signal);
        assert!(signal.is_attached());
        drop(stream);
        assert!(!signal.is_attached());
    }
}
