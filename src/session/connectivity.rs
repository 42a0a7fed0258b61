use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::remote::RemoteStore;
use crate::store::queue::MutationQueue;

/// Binary online/offline signal shared by the logger and the reconnect
/// listener. Cloning shares the same signal.
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns true when this call changed the state.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            debug!(online, "connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Drain `queue` on every offline -> online transition. The drain runs on
    /// its own task so the listener never blocks; overlapping triggers are
    /// absorbed by the queue's single-flight guard. The listener exits once
    /// every clone of this monitor is dropped.
    pub fn drain_on_reconnect(
        &self,
        queue: Arc<MutationQueue>,
        remote: Arc<dyn RemoteStore>,
    ) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        // Baseline is taken here, not in the task, so a flip that lands
        // before the task first runs still counts as a transition.
        let mut was_online = *rx.borrow_and_update();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    let queue = Arc::clone(&queue);
                    let remote = Arc::clone(&remote);
                    tokio::spawn(async move {
                        match queue.drain(remote.as_ref()).await {
                            Ok(Some(report)) => info!(
                                succeeded = report.succeeded,
                                failed = report.failed,
                                "reconnect drain finished"
                            ),
                            Ok(None) => {}
                            Err(err) => warn!(error = %err, "reconnect drain aborted"),
                        }
                    });
                }
                was_online = online;
            }
        })
    }
}
