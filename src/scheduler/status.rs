//! Point-in-time task status resolution.

use super::ConversionScheduler;
use crate::types::{TaskId, TaskSnapshot};

impl ConversionScheduler {
    /// Where is this task right now?
    ///
    /// Resolution order: active tasks first (live progress), then history
    /// (terminal outcome), then the pending queue. Returns None for unknown
    /// IDs.
    pub async fn status(&self, id: &TaskId) -> Option<TaskSnapshot> {
        {
            let active = self.queue_state.active_tasks.lock().await;
            if let Some(entry) = active.get(id) {
                let task = entry.task.lock().await;
                return Some(TaskSnapshot::from_task(&task));
            }
        }

        if let Some(record) = self.history.get(id).await {
            return Some(TaskSnapshot::from_record(&record));
        }

        let pending = self.queue_state.pending.lock().await;
        pending
            .iter()
            .find(|t| &t.id == id)
            .map(TaskSnapshot::from_task)
    }
}
