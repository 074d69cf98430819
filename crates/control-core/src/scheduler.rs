use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::error::SchedulerError;

/// Unique, monotonically increasing handle for a scheduled task, returned to
/// the caller so it can later be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

/// Describes an action's repetition, normalized from a wire `repeat`
/// clause. `None` means "run once and forget"; `Some(None)` means "repeat
/// forever"; `Some(Some(n))` means "n further executions".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Repeat {
    pub times: Option<u64>,
    pub interval: Duration,
}

impl Repeat {
    pub fn validate(times: Option<i64>, interval: f64) -> Result<Self, SchedulerError> {
        if interval <= 0.0 {
            return Err(SchedulerError::NonPositiveInterval(interval));
        }
        let times = match times {
            None => None,
            Some(t) if t < 0 => return Err(SchedulerError::NegativeTimes(t)),
            Some(t) => Some(t as u64),
        };
        Ok(Self {
            times,
            interval: Duration::from_secs_f64(interval),
        })
    }
}

/// A user-visible snapshot of a scheduled task, for `GET /list_deferred`.
/// `metadata` is opaque to the scheduler — the control server stashes the
/// controller name and partial state there so it can report them back
/// without the scheduler needing to know anything about dispatchers.
#[derive(Debug, Clone)]
pub struct TaskDescription {
    pub id: TaskId,
    pub label: String,
    pub due: Vec<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

/// The work a scheduled task performs when due. Boxed so the scheduler
/// itself stays agnostic of what "action" means — the control-server binds
/// this to `Dispatcher::mute_set_state`. Async because the action is
/// itself a dispatcher call that goes over a channel.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type Action = Arc<dyn Fn() -> ActionFuture + Send + Sync>;

struct Task {
    id: TaskId,
    label: String,
    action: Action,
    /// Remaining one-shot due times, soonest first consumed from the front.
    due: Vec<DateTime<Utc>>,
    repeat: Option<Repeat>,
    metadata: serde_json::Value,
}

impl Task {
    /// Pops the next due time this task should fire at, or `None` if it has
    /// nothing left to schedule.
    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.due.first().copied()
    }

    /// Advances past the due time at the front of `due` and returns the
    /// action's future for the owner loop to await.
    fn fire(&mut self) -> ActionFuture {
        if !self.due.is_empty() {
            self.due.remove(0);
        }
        (self.action)()
    }

    fn reschedule_after_fire(&mut self, fired_at: DateTime<Utc>) {
        if self.due.is_empty() {
            if let Some(repeat) = &mut self.repeat {
                let keep_going = match repeat.times {
                    None => true,
                    Some(0) => false,
                    Some(ref mut n) => {
                        *n -= 1;
                        true
                    }
                };
                if keep_going {
                    if let Ok(delta) = chrono::Duration::from_std(repeat.interval) {
                        self.due.push(fired_at + delta);
                    }
                }
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.due.is_empty()
    }
}

/// One entry in the scheduler's min-heap: a task id paired with its next due
/// time and a monotonic insertion sequence. Ordered so `BinaryHeap` (a
/// max-heap) pops the *soonest* due time first, ties broken in FIFO
/// insertion order.
struct HeapEntry {
    due: DateTime<Utc>,
    seq: u64,
    id: TaskId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest due time
        // (and, on ties, the earliest-inserted entry) to sort "greatest".
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum Control {
    Schedule {
        label: String,
        action: Action,
        due: Vec<DateTime<Utc>>,
        repeat: Option<Repeat>,
        metadata: serde_json::Value,
        reply: oneshot::Sender<TaskId>,
    },
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<()>,
    },
    List {
        reply: oneshot::Sender<Vec<TaskDescription>>,
    },
    Shutdown,
}

/// Owner of a min-heap of deferred tasks. Like
/// [`crate::dispatcher::Dispatcher`], all mutable state lives behind a
/// single owner task; callers talk to it over a control channel.
pub struct Scheduler {
    tx: mpsc::Sender<Control>,
    handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(owner_loop(rx));
        Self {
            tx,
            handle: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    /// Schedules `action` to run at each of `due` (in order), then according
    /// to `repeat` once `due` is exhausted. `metadata` is opaque and
    /// returned verbatim by [`Scheduler::list`].
    pub async fn schedule(
        &self,
        label: impl Into<String>,
        due: Vec<DateTime<Utc>>,
        repeat: Option<Repeat>,
        metadata: serde_json::Value,
        action: Action,
    ) -> Result<TaskId, SchedulerError> {
        if due.is_empty() {
            return Err(SchedulerError::EmptyAtList);
        }
        let (reply, reply_rx) = oneshot::channel();
        let sent = self
            .tx
            .send(Control::Schedule {
                label: label.into(),
                action,
                due,
                repeat,
                metadata,
                reply,
            })
            .await;
        if sent.is_err() {
            return Err(SchedulerError::InvalidTimeSpec("scheduler is stopped".into()));
        }
        reply_rx
            .await
            .map_err(|_| SchedulerError::InvalidTimeSpec("scheduler is stopped".into()))
    }

    pub async fn cancel(&self, id: TaskId) -> bool {
        let (reply, reply_rx) = oneshot::channel();
        if self.tx.send(Control::Cancel { id, reply }).await.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Drops every pending task, replacing the heap with an empty one.
    /// Tasks already dispatched to a controller run to completion.
    pub async fn cancel_all(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.tx.send(Control::CancelAll { reply }).await.is_err() {
            return;
        }
        let _ = reply_rx.await;
    }

    pub async fn list(&self) -> Vec<TaskDescription> {
        let (reply, reply_rx) = oneshot::channel();
        if self.tx.send(Control::List { reply }).await.is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(Control::Shutdown).await;
        let mut handle = self.handle.lock().await;
        if let Some(handle) = handle.take() {
            let _ = handle.await;
        }
    }
}

async fn owner_loop(mut rx: mpsc::Receiver<Control>) {
    let mut tasks: std::collections::HashMap<TaskId, Task> = std::collections::HashMap::new();
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
    let next_id = AtomicU64::new(1);
    let next_seq = AtomicU64::new(1);

    loop {
        let wait = heap
            .peek()
            .map(|entry| {
                let now = Utc::now();
                (entry.due - now).to_std().unwrap_or(Duration::ZERO)
            })
            .unwrap_or(Duration::from_secs(3600));

        tokio::select! {
            biased;

            msg = rx.recv() => {
                match msg {
                    Some(Control::Schedule { label, action, due, repeat, metadata, reply }) => {
                        let id = TaskId(next_id.fetch_add(1, AtomicOrdering::SeqCst));
                        for &when in &due {
                            heap.push(HeapEntry {
                                due: when,
                                seq: next_seq.fetch_add(1, AtomicOrdering::SeqCst),
                                id,
                            });
                        }
                        tasks.insert(id, Task { id, label, action, due, repeat, metadata });
                        let _ = reply.send(id);
                    }
                    Some(Control::Cancel { id, reply }) => {
                        let existed = tasks.remove(&id).is_some();
                        let _ = reply.send(existed);
                        // stale heap entries for this id are dropped lazily when popped
                    }
                    Some(Control::CancelAll { reply }) => {
                        tasks.clear();
                        heap.clear();
                        let _ = reply.send(());
                    }
                    Some(Control::List { reply }) => {
                        let snapshot = tasks
                            .values()
                            .map(|t| TaskDescription {
                                id: t.id,
                                label: t.label.clone(),
                                due: t.due.clone(),
                                metadata: t.metadata.clone(),
                            })
                            .collect();
                        let _ = reply.send(snapshot);
                    }
                    Some(Control::Shutdown) | None => break,
                }
            }

            () = tokio::time::sleep(wait) => {
                let now = Utc::now();
                while let Some(top) = heap.peek() {
                    if top.due > now {
                        break;
                    }
                    let entry = heap.pop().expect("peeked");
                    let Some(task) = tasks.get_mut(&entry.id) else {
                        continue; // cancelled
                    };
                    // a stale entry from a superseded schedule
                    if task.next_due() != Some(entry.due) {
                        continue;
                    }
                    let label = task.label.clone();
                    let fut = task.fire();
                    if let Err(err) = fut.await {
                        tracing::error!(task = %label, error = %err, "scheduled action failed");
                    }
                    // re-borrow: the task may have been cancelled while we awaited its action
                    let Some(task) = tasks.get_mut(&entry.id) else {
                        continue;
                    };
                    task.reschedule_after_fire(entry.due);
                    if let Some(next) = task.next_due() {
                        heap.push(HeapEntry {
                            due: next,
                            seq: next_seq.fetch_add(1, AtomicOrdering::SeqCst),
                            id: entry.id,
                        });
                    } else if task.is_exhausted() {
                        tasks.remove(&entry.id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as O};

    /// Wraps a synchronous closure as an [`Action`] for tests that don't
    /// need to exercise real async work inside the fired task.
    fn sync_action<F>(f: F) -> Action
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        Arc::new(move || {
            let result = f();
            Box::pin(async move { result }) as ActionFuture
        })
    }

    #[tokio::test]
    async fn one_shot_task_fires_once() {
        let scheduler = Scheduler::start();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let due = vec![Utc::now() + chrono::Duration::milliseconds(20)];
        scheduler
            .schedule(
                "bump",
                due,
                None,
                serde_json::Value::Null,
                sync_action(move || {
                    calls2.fetch_add(1, O::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(calls.load(O::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn repeat_forever_keeps_firing_until_cancelled() {
        let scheduler = Scheduler::start();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let due = vec![Utc::now() + chrono::Duration::milliseconds(10)];
        let repeat = Repeat::validate(None, 0.02).unwrap();
        let id = scheduler
            .schedule(
                "tick",
                due,
                Some(repeat),
                serde_json::Value::Null,
                sync_action(move || {
                    calls2.fetch_add(1, O::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(90)).await;
        let cancelled = scheduler.cancel(id).await;
        assert!(cancelled);
        let after_cancel = calls.load(O::SeqCst);
        assert!(after_cancel >= 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(calls.load(O::SeqCst), after_cancel);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn ties_fire_in_fifo_insertion_order() {
        let scheduler = Scheduler::start();
        let order = Arc::new(std::sync::Mutex::new(Vec::<u32>::new()));
        let same_due = Utc::now() + chrono::Duration::milliseconds(20);

        for i in 0..5u32 {
            let order = order.clone();
            scheduler
                .schedule(
                    format!("task-{i}"),
                    vec![same_due],
                    None,
                    serde_json::Value::Null,
                    sync_action(move || {
                        order.lock().unwrap().push(i);
                        Ok(())
                    }),
                )
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let observed = order.lock().unwrap().clone();
        assert_eq!(observed, vec![0, 1, 2, 3, 4]);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn negative_repeat_times_is_rejected() {
        let err = Repeat::validate(Some(-1), 1.0).unwrap_err();
        assert!(matches!(err, SchedulerError::NegativeTimes(-1)));
    }

    #[tokio::test]
    async fn non_positive_interval_is_rejected() {
        let err = Repeat::validate(None, 0.0).unwrap_err();
        assert!(matches!(err, SchedulerError::NonPositiveInterval(_)));
    }

    #[tokio::test]
    async fn cancel_of_unknown_id_returns_false() {
        let scheduler = Scheduler::start();
        let found = scheduler.cancel(TaskId(99_999)).await;
        assert!(!found);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn cancel_all_empties_the_schedule_and_stops_future_firing() {
        let scheduler = Scheduler::start();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let due = vec![Utc::now() + chrono::Duration::milliseconds(30)];
        scheduler
            .schedule(
                "bump",
                due,
                None,
                serde_json::Value::Null,
                sync_action(move || {
                    calls2.fetch_add(1, O::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap();

        scheduler.cancel_all().await;
        assert!(scheduler.list().await.is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(calls.load(O::SeqCst), 0);
        scheduler.stop().await;
    }
}
