//! Fire-and-forget dispatch of revalidation plans to an [`Invalidator`].

use std::sync::Arc;

use findmylab_core::Opportunity;
use findmylab_store::{CollectionHooks, RequestContext};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::invalidator::Invalidator;
use crate::plan::{plan_after_change, plan_after_delete, Revalidation};

enum Message {
    Apply(Vec<Revalidation>),
    Flush(oneshot::Sender<()>),
}

/// Collection hooks that plan invalidations synchronously and hand them to a
/// single background worker. A failing invalidation is logged and dropped;
/// it never reaches the write that caused it.
#[derive(Debug, Clone)]
pub struct Revalidator {
    tx: mpsc::UnboundedSender<Message>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Apply(plan) => f.debug_tuple("Apply").field(plan).finish(),
            Message::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl Revalidator {
    /// Starts the worker on the current tokio runtime. The worker exits once
    /// every `Revalidator` clone is dropped.
    pub fn spawn(invalidator: Arc<dyn Invalidator>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(rx, invalidator));
        (Self { tx }, handle)
    }

    /// Resolves once everything enqueued before this call has been applied.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Message::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    fn enqueue(&self, plan: Vec<Revalidation>) {
        if plan.is_empty() {
            return;
        }
        for step in &plan {
            info!("{}", step.log_message());
        }
        if self.tx.send(Message::Apply(plan)).is_err() {
            warn!("revalidation worker has stopped; dropping invalidations");
        }
    }
}

impl CollectionHooks for Revalidator {
    fn after_change(&self, doc: &Opportunity, previous: Option<&Opportunity>, ctx: &RequestContext) {
        self.enqueue(plan_after_change(doc, previous, ctx));
    }

    fn after_delete(&self, doc: &Opportunity, ctx: &RequestContext) {
        self.enqueue(plan_after_delete(doc, ctx).into_iter().collect());
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Message>, invalidator: Arc<dyn Invalidator>) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Apply(plan) => {
                for step in plan {
                    for invalidation in step.invalidations() {
                        if let Err(err) = invalidator.apply(&invalidation).await {
                            warn!(%invalidation, error = %err, "invalidation failed");
                        }
                    }
                }
            }
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
