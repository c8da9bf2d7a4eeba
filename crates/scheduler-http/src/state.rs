use std::sync::Arc;

use scheduler_engine::SchedulerHandle;
use scheduler_service::WorkflowService;

/// Shared state handed to every route: the Workflow Service (which owns the
/// `Repository`) and a handle to the running Scheduler (needed only by the
/// cancel endpoint, to tear down an in-memory task).
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
    pub scheduler: Arc<SchedulerHandle>,
}
