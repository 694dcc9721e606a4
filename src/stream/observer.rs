//! Event dispatch to stream observers

use super::types::{ConnectionState, PriceUpdate, StreamEvent};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Consumer of stream events
///
/// Called from the dispatcher task, never from the receive loop. Errors and panics
/// are logged and swallowed.
pub trait StreamObserver: Send + Sync {
    fn on_price_update(&self, _update: &PriceUpdate) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_state_change(&self, _state: ConnectionState, _reason: Option<&str>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Forward events to every observer until the channel closes
pub fn spawn_dispatcher(
    mut events: mpsc::Receiver<StreamEvent>,
    observers: Vec<Arc<dyn StreamObserver>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            for observer in &observers {
                dispatch(observer.as_ref(), &event);
            }
        }
        tracing::debug!("Event dispatcher stopped");
    })
}

fn dispatch(observer: &dyn StreamObserver, event: &StreamEvent) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match event {
        StreamEvent::PriceUpdated(update) => observer.on_price_update(update),
        StreamEvent::StateChanged { state, reason } => {
            observer.on_state_change(*state, reason.as_deref())
        }
    }));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Stream observer failed"),
        Err(_) => tracing::error!("Stream observer panicked"),
    }
}
