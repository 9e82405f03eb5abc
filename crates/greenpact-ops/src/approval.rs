use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use greenpact_core::{ContractId, Notice, Notifier};
use greenpact_realtime::{ChannelEvent, ReplyTo};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Notify, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

pub(crate) type InFlight = Arc<RwLock<BTreeSet<ContractId>>>;

#[derive(Debug)]
struct PendingApproval {
    contract_id: ContractId,
    deadline: Instant,
}

/// Replies settle only the approval they answer; snapshots settle any
/// pending contract they list as active.
pub(crate) struct ApprovalTracker {
    pending: Arc<Mutex<VecDeque<PendingApproval>>>,
    wake: Arc<Notify>,
    timeout: Duration,
    task: JoinHandle<()>,
}

impl ApprovalTracker {
    pub(crate) fn spawn(
        events: broadcast::Receiver<ChannelEvent>,
        approving: InFlight,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
    ) -> Self {
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(settle(
            events,
            pending.clone(),
            wake.clone(),
            approving,
            notifier,
        ));
        Self {
            pending,
            wake,
            timeout,
            task,
        }
    }

    pub(crate) async fn track(&self, contract_id: ContractId) {
        self.pending.lock().await.push_back(PendingApproval {
            contract_id,
            deadline: Instant::now() + self.timeout,
        });
        self.wake.notify_one();
    }

    pub(crate) async fn untrack(&self, contract_id: &ContractId) {
        let mut pending = self.pending.lock().await;
        if let Some(index) = pending
            .iter()
            .rposition(|entry| &entry.contract_id == contract_id)
        {
            pending.remove(index);
        }
    }
}

async fn take_answered(
    pending: &Mutex<VecDeque<PendingApproval>>,
    reply_to: Option<ReplyTo>,
) -> Option<ContractId> {
    let contract_id = reply_to
        .filter(ReplyTo::is_approval)
        .and_then(|request| request.contract_id)?;
    let mut pending = pending.lock().await;
    let index = pending
        .iter()
        .position(|entry| entry.contract_id == contract_id)?;
    pending.remove(index).map(|entry| entry.contract_id)
}

impl Drop for ApprovalTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn settle(
    mut events: broadcast::Receiver<ChannelEvent>,
    pending: Arc<Mutex<VecDeque<PendingApproval>>>,
    wake: Arc<Notify>,
    approving: InFlight,
    notifier: Arc<dyn Notifier>,
) {
    loop {
        let next_deadline = pending.lock().await.front().map(|entry| entry.deadline);

        tokio::select! {
            event = events.recv() => match event {
                Ok(ChannelEvent::Acknowledged { reply_to }) => {
                    let Some(contract_id) = take_answered(&pending, reply_to).await else {
                        debug!("acknowledgement does not answer a pending approval");
                        continue;
                    };
                    approving.write().await.remove(&contract_id);
                    info!(%contract_id, "approval acknowledged");
                }
                Ok(ChannelEvent::Rejected { reply_to, message }) => {
                    let Some(contract_id) = take_answered(&pending, reply_to).await else {
                        debug!(%message, "rejection does not answer a pending approval");
                        continue;
                    };
                    approving.write().await.remove(&contract_id);
                    warn!(%contract_id, %message, "approval rejected");
                    notifier.notify(Notice::error("Approval Rejected").with_description(message));
                }
                Ok(ChannelEvent::Snapshot { contracts, .. }) => {
                    let active: BTreeSet<&ContractId> = contracts
                        .iter()
                        .filter(|contract| contract.status.is_active())
                        .map(|contract| &contract.id)
                        .collect();
                    let mut queue = pending.lock().await;
                    let mut settled = Vec::new();
                    queue.retain(|entry| {
                        let confirmed = active.contains(&entry.contract_id);
                        if confirmed {
                            settled.push(entry.contract_id.clone());
                        }
                        !confirmed
                    });
                    drop(queue);

                    if !settled.is_empty() {
                        let mut in_flight = approving.write().await;
                        for contract_id in settled {
                            in_flight.remove(&contract_id);
                            info!(%contract_id, "approval confirmed by snapshot");
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "approval tracker lagged behind channel events");
                }
                Err(RecvError::Closed) => {
                    let drained: Vec<_> = pending.lock().await.drain(..).collect();
                    for entry in drained {
                        unconfirmed(&approving, notifier.as_ref(), entry.contract_id).await;
                    }
                    return;
                }
            },
            _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                let now = Instant::now();
                let mut expired = Vec::new();
                {
                    let mut queue = pending.lock().await;
                    while queue.front().is_some_and(|entry| entry.deadline <= now) {
                        if let Some(entry) = queue.pop_front() {
                            expired.push(entry.contract_id);
                        }
                    }
                }
                for contract_id in expired {
                    unconfirmed(&approving, notifier.as_ref(), contract_id).await;
                }
            }
            _ = wake.notified() => {}
        }
    }
}

async fn unconfirmed(approving: &InFlight, notifier: &dyn Notifier, contract_id: ContractId) {
    approving.write().await.remove(&contract_id);
    warn!(%contract_id, "approval was not confirmed in time");
    notifier.notify(
        Notice::error("Approval Unconfirmed")
            .with_description(format!("No confirmation received for contract {contract_id}")),
    );
}
