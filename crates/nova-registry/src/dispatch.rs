//! Event Dispatcher (Component F, `spec.md` §4.F).
//!
//! A dedicated single-worker thread drains a FIFO queue of dispatch jobs one
//! at a time — this *is* the "at most one dispatch job runs or is pending"
//! discipline from §4.F: jobs queued behind an in-flight one simply wait in
//! the channel. Each job delivers the captured listener/delta snapshot,
//! catches (but never propagates) listener panics, then performs the
//! deferred physical-removal phase directly against the object manager —
//! so handles captured before cleanup stay valid for the whole dispatch.

use crate::delta::{DeltaKind, RegistryDelta};
use crate::id::{BundleId, EntityKind};
use crate::listener::{DispatchStatus, ListenerEntry, ListenerFailure, RegistryChangeEvent};
use crate::registry::Shared;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub(crate) struct DispatchJob {
    pub(crate) listeners: Vec<ListenerEntry>,
    pub(crate) deltas: Arc<HashMap<BundleId, RegistryDelta>>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) result_tx: Option<oneshot::Sender<DispatchStatus>>,
}

/// Owns the dispatch queue's dedicated worker thread.
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<DispatchJob>,
}

impl Dispatcher {
    pub(crate) fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DispatchJob>();
        std::thread::Builder::new()
            .name("nova-registry-dispatch".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("failed to start dispatch runtime");
                rt.block_on(async move {
                    while let Some(job) = rx.recv().await {
                        run_job(job).await;
                    }
                });
            })
            .expect("failed to spawn dispatch thread");
        Self { tx }
    }

    pub(crate) fn schedule(&self, job: DispatchJob) {
        // An unbounded send never blocks; this is the "non-blocking
        // scheduling" guarantee in §4.G — the writer that calls this is
        // still holding the write lock.
        let _ = self.tx.send(job);
    }
}

async fn run_job(job: DispatchJob) {
    let mut status = DispatchStatus::default();

    for entry in &job.listeners {
        if let Some(filter) = entry.filter {
            if !job.deltas.contains_key(&filter) {
                continue;
            }
        }
        let event = RegistryChangeEvent::new(job.deltas.clone(), entry.filter);
        let listener = entry.listener.clone();
        if std::panic::catch_unwind(AssertUnwindSafe(|| listener.changed(&event))).is_err() {
            tracing::error!(
                target: "nova.registry.dispatch",
                filter = ?entry.filter,
                "registry change listener panicked"
            );
            status.failures.push(ListenerFailure {
                filter: entry.filter,
                panic_message: "listener panicked".to_string(),
            });
        }
    }

    physical_cleanup(&job.shared, &job.deltas);

    if let Some(tx) = job.result_tx {
        let _ = tx.send(status);
    }
}

/// Deferred physical removal, run after every listener has seen the
/// outgoing deltas (§4.F). Only extensions whose *own* bundle matches the
/// bundle the delta was filed under are destroyed: an extension that was
/// merely unlinked from a departing namespace's extension point (and moved
/// back into the orphan table by the resolver) keeps its own bundle id, so
/// it is left alone here — it is still resident, just orphaned again
/// (`spec.md` §8 scenario 2).
fn physical_cleanup(shared: &Arc<Shared>, deltas: &HashMap<BundleId, RegistryDelta>) {
    let mut manager = shared.manager.write();
    for (bundle_id, delta) in deltas {
        for ext_delta in &delta.extension_deltas {
            if ext_delta.kind != DeltaKind::Removed {
                continue;
            }
            let Some(rec) = manager.extension(ext_delta.extension_id) else {
                continue;
            };
            if rec.bundle_id != *bundle_id {
                continue;
            }
            for &child_id in &rec.raw_children {
                for (id, kind) in manager.config_subtree(child_id) {
                    manager.remove(id, kind, true);
                }
            }
            manager.remove(ext_delta.extension_id, EntityKind::Extension, true);
        }

        for unique_id in &delta.removed_extension_points {
            manager.remove_extension_point(unique_id.as_str());
        }
    }
}
