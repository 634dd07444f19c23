//! Quiet-network detection from request lifecycle events.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::page::{RequestEvent, RequestStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    Idle,
    TimedOut,
}

impl IdleOutcome {
    pub fn describe(&self, idle: Duration, timeout: Duration) -> String {
        match self {
            IdleOutcome::Idle => format!("network idle ({}ms window)", idle.as_millis()),
            IdleOutcome::TimedOut => {
                format!("waitNetworkIdle timed out after {}ms", timeout.as_millis())
            }
        }
    }
}

/// Wait until no request has been in flight for `idle`, or `timeout` passes.
///
/// The idle timer is armed at start and re-armed each time a request
/// finishes or fails. It only resolves the wait if nothing is in flight when
/// it fires.
pub async fn wait_network_idle(
    mut events: RequestStream,
    idle: Duration,
    timeout: Duration,
) -> IdleOutcome {
    let deadline = Instant::now() + timeout;
    let mut idle_at = Some(Instant::now() + idle);
    let mut in_flight: usize = 0;
    let mut open = true;

    loop {
        let armed = idle_at;
        let idle_timer = async move {
            match armed {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = sleep_until(deadline) => return IdleOutcome::TimedOut,
            _ = idle_timer => {
                if in_flight == 0 {
                    return IdleOutcome::Idle;
                }
                idle_at = None;
            }
            event = events.recv(), if open => match event {
                Some(RequestEvent::Started(id)) => {
                    in_flight += 1;
                    debug!(request = %id, in_flight, "request started");
                }
                Some(RequestEvent::Finished(id)) | Some(RequestEvent::Failed(id)) => {
                    in_flight = in_flight.saturating_sub(1);
                    debug!(request = %id, in_flight, "request settled");
                    idle_at = Some(Instant::now() + idle);
                }
                None => open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn stream() -> (mpsc::UnboundedSender<RequestEvent>, RequestStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, RequestStream::new(rx, None))
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_page_goes_idle_after_window() {
        let (_tx, events) = stream();
        let started = Instant::now();
        let outcome =
            wait_network_idle(events, Duration::from_millis(800), Duration::from_secs(15)).await;

        assert_eq!(outcome, IdleOutcome::Idle);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(800) && waited < Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_request_rearms_timer() {
        let (tx, events) = stream();
        tokio::spawn(async move {
            tx.send(RequestEvent::Started("1".into())).unwrap();
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            tx.send(RequestEvent::Finished("1".into())).unwrap();
            std::future::pending::<()>().await;
        });

        let started = Instant::now();
        let outcome =
            wait_network_idle(events, Duration::from_millis(800), Duration::from_secs(15)).await;

        assert_eq!(outcome, IdleOutcome::Idle);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1_800) && waited < Duration::from_millis(1_900));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_request_times_out() {
        let (tx, events) = stream();
        tx.send(RequestEvent::Started("slow".into())).unwrap();

        let outcome =
            wait_network_idle(events, Duration::from_millis(800), Duration::from_secs(3)).await;

        assert_eq!(outcome, IdleOutcome::TimedOut);
        assert_eq!(
            outcome.describe(Duration::from_millis(800), Duration::from_secs(3)),
            "waitNetworkIdle timed out after 3000ms"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_request_counts_as_settled() {
        let (tx, events) = stream();
        tx.send(RequestEvent::Started("a".into())).unwrap();
        tx.send(RequestEvent::Failed("a".into())).unwrap();
        drop(tx);

        let outcome =
            wait_network_idle(events, Duration::from_millis(500), Duration::from_secs(5)).await;
        assert_eq!(outcome, IdleOutcome::Idle);
    }
}
