//! In-process `DeviceLink` adapter (spec §1 Non-goals excludes a real wire
//! transport; this stands in for one). Grounded on the teacher's substrate
//! adapters (`infrastructure/substrates/claude_code.rs`): an `async_trait`
//! port implementation that owns a handle to an out-of-process worker, here
//! a `tokio::task` reading task requests off an mpsc channel and driving a
//! user-supplied executor closure instead of shelling out to a CLI.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::ports::device_link::{DeviceLink, TaskReplyFrame, TaskReplyStatus, TaskRequestFrame};

/// A fallible in-process stand-in for a device's task executor. Given a
/// `TaskRequestFrame`, produces the reply the real device would have sent.
pub type Executor = Arc<dyn Fn(TaskRequestFrame) -> CoreResult<TaskReplyFrame> + Send + Sync>;

enum Pending {
    Waiting,
    Delivered(TaskReplyFrame),
}

/// A `DeviceLink` backed by an in-process executor closure rather than a
/// socket. `send_task_request` spawns the executor on a blocking-safe
/// `tokio::task` and stashes the result for `await_task_reply` to collect;
/// `send_abort` just drops the pending slot since there is no real process
/// to signal.
pub struct ChannelDeviceLink {
    device_id: String,
    executor: Executor,
    connected: std::sync::atomic::AtomicBool,
    pending: Mutex<HashMap<String, oneshot::Receiver<TaskReplyFrame>>>,
}

impl ChannelDeviceLink {
    pub fn new(device_id: impl Into<String>, executor: Executor) -> Arc<Self> {
        Arc::new(Self {
            device_id: device_id.into(),
            executor,
            connected: std::sync::atomic::AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Simulates the transport dropping (spec §4.3 liveness). After this,
    /// `is_connected` reports false until a fresh `register()` replaces the
    /// link in the registry.
    pub fn disconnect(&self) {
        self.connected.store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceLink for ChannelDeviceLink {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn send_task_request(&self, frame: TaskRequestFrame) -> CoreResult<()> {
        if !self.is_connected() {
            return Err(CoreError::TransportError(format!("{} is disconnected", self.device_id)));
        }
        let (tx, rx) = oneshot::channel();
        let executor = Arc::clone(&self.executor);
        let task_id = frame.task_id.clone();
        tokio::spawn(async move {
            let reply = (executor)(frame).unwrap_or_else(|err| TaskReplyFrame {
                task_id: task_id.clone(),
                status: TaskReplyStatus::Failed,
                result: None,
                error: Some(err.to_string()),
                duration: 0.0,
                metrics: None,
            });
            let _ = tx.send(reply);
        });
        self.pending.lock().await.insert(task_id, rx);
        Ok(())
    }

    async fn await_task_reply(&self, task_id: &str, timeout_duration: Duration) -> CoreResult<TaskReplyFrame> {
        let rx = self
            .pending
            .lock()
            .await
            .remove(task_id)
            .ok_or_else(|| CoreError::TransportError(format!("no pending task_request for {task_id}")))?;

        match tokio::time::timeout(timeout_duration, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CoreError::TransportError(format!("executor dropped for {task_id}"))),
            Err(_) => Err(CoreError::Timeout(format!("no task_reply for {task_id} within the deadline"))),
        }
    }

    async fn send_abort(&self, task_id: &str) -> CoreResult<()> {
        self.pending.lock().await.remove(task_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_executor() -> Executor {
        Arc::new(|frame: TaskRequestFrame| {
            Ok(TaskReplyFrame {
                task_id: frame.task_id,
                status: TaskReplyStatus::Completed,
                result: Some(serde_json::json!({"ok": true})),
                error: None,
                duration: 0.01,
                metrics: None,
            })
        })
    }

    #[tokio::test]
    async fn request_then_await_reply_round_trips() {
        let link = ChannelDeviceLink::new("A", echo_executor());
        link.send_task_request(TaskRequestFrame {
            session_id: "s1".into(),
            constellation_id: "c1".into(),
            task_id: "t1".into(),
            description: "do a thing".into(),
            tips: vec![],
            context: None,
        })
        .await
        .unwrap();
        let reply = link.await_task_reply("t1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.status, TaskReplyStatus::Completed);
    }

    #[tokio::test]
    async fn awaiting_an_unknown_task_errors() {
        let link = ChannelDeviceLink::new("A", echo_executor());
        let err = link.await_task_reply("ghost", Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err.kind(), "transport_error");
    }

    #[tokio::test]
    async fn disconnected_link_rejects_new_requests() {
        let link = ChannelDeviceLink::new("A", echo_executor());
        link.disconnect();
        let err = link
            .send_task_request(TaskRequestFrame {
                session_id: "s1".into(),
                constellation_id: "c1".into(),
                task_id: "t1".into(),
                description: "d".into(),
                tips: vec![],
                context: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport_error");
    }

    #[tokio::test(start_paused = true)]
    async fn await_times_out_when_executor_never_replies() {
        let link = ChannelDeviceLink::new(
            "A",
            Arc::new(|frame: TaskRequestFrame| {
                Ok(TaskReplyFrame {
                    task_id: frame.task_id,
                    status: TaskReplyStatus::Completed,
                    result: None,
                    error: None,
                    duration: 0.0,
                    metrics: None,
                })
            }),
        );
        // Steal the pending slot before the executor can fill it, so
        // `await_task_reply` waits on a receiver that never resolves.
        link.pending.lock().await.insert("ghost-task".into(), oneshot::channel().1);
        let err = link.await_task_reply("ghost-task", Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }
}
