use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{Branch, Job, JobId, JobStatus, JobType, UserId, Workflow, WorkflowId};

use crate::error::StoreResult;
use crate::repository::Repository;

/// In-process [`Repository`] backed by a single mutex-guarded map.
///
/// Exists so the Scheduler's admission, dispatch and cascade logic can be
/// unit tested without a live Postgres instance. Behaves like a single
/// replica: callers wanting multi-replica append races should use
/// [`crate::PostgresStore`] against a real database instead.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    workflows: HashMap<WorkflowId, Workflow>,
    branches: HashMap<scheduler_core::BranchId, Branch>,
    jobs: HashMap<JobId, Job>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn branch_jobs_sorted(inner: &Inner, branch_id: scheduler_core::BranchId) -> Vec<Job> {
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.branch_id == branch_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.order_index);
        jobs
    }
}

#[async_trait]
impl Repository for InMemoryStore {
    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        Ok(self.inner.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn incomplete_users(&self) -> StoreResult<Vec<UserId>> {
        let inner = self.inner.lock().unwrap();
        let mut first_seen: HashMap<UserId, DateTime<Utc>> = HashMap::new();
        for job in inner
            .jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Running))
        {
            first_seen
                .entry(job.user_id.clone())
                .and_modify(|t| *t = (*t).min(job.created_at))
                .or_insert(job.created_at);
        }
        let mut users: Vec<(UserId, DateTime<Utc>)> = first_seen.into_iter().collect();
        users.sort_by_key(|(_, t)| *t);
        Ok(users.into_iter().map(|(u, _)| u).collect())
    }

    async fn runnable(&self, allowed_users: &[UserId]) -> StoreResult<Vec<Job>> {
        if allowed_users.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && allowed_users.contains(&j.user_id))
            .filter(|j| {
                let predecessor_status = if j.order_index == 0 {
                    None
                } else {
                    inner
                        .jobs
                        .values()
                        .find(|p| p.branch_id == j.branch_id && p.order_index == j.order_index - 1)
                        .map(|p| p.status)
                };
                j.is_runnable(predecessor_status)
            })
            .cloned()
            .collect();
        out.sort_by_key(|j| j.created_at);
        Ok(out)
    }

    async fn cascade_cancel(&self) -> StoreResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let to_cancel: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .filter_map(|j| {
                if j.order_index == 0 {
                    return None;
                }
                let predecessor = inner
                    .jobs
                    .values()
                    .find(|p| p.branch_id == j.branch_id && p.order_index == j.order_index - 1)?;
                matches!(predecessor.status, JobStatus::Failed | JobStatus::Cancelled).then_some(j.id)
            })
            .collect();
        let now = Utc::now();
        for id in &to_cancel {
            if let Some(job) = inner.jobs.get_mut(id) {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(now);
            }
        }
        Ok(to_cancel.len() as u64)
    }

    async fn get_or_create_branch(&self, workflow_id: WorkflowId, name: &str) -> StoreResult<Branch> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(branch) = inner
            .branches
            .values()
            .find(|b| b.workflow_id == workflow_id && b.name == name)
        {
            return Ok(branch.clone());
        }
        let branch = Branch {
            id: scheduler_core::BranchId::new(),
            workflow_id,
            name: name.to_string(),
        };
        inner.branches.insert(branch.id, branch.clone());
        Ok(branch)
    }

    async fn append_job(
        &self,
        workflow_id: WorkflowId,
        branch: &Branch,
        user_id: UserId,
        job_type: JobType,
        input_path: String,
        output_path: String,
    ) -> StoreResult<Job> {
        let mut inner = self.inner.lock().unwrap();
        let order_index = Self::branch_jobs_sorted(&inner, branch.id)
            .last()
            .map(|j| j.order_index + 1)
            .unwrap_or(0);
        let job = Job {
            id: JobId::new(),
            workflow_id,
            branch_id: branch.id,
            user_id,
            job_type,
            input_path,
            output_path,
            status: JobStatus::Pending,
            progress: 0.0,
            order_index,
            total_tiles: None,
            processed_tiles: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn create_workflow(&self, user_id: UserId, name: String) -> StoreResult<Workflow> {
        let mut inner = self.inner.lock().unwrap();
        let workflow = Workflow {
            id: WorkflowId::new(),
            user_id,
            name,
            created_at: Utc::now(),
        };
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: WorkflowId) -> StoreResult<Option<Workflow>> {
        Ok(self.inner.lock().unwrap().workflows.get(&id).cloned())
    }

    async fn list_workflows(&self, user_id: &UserId) -> StoreResult<Vec<Workflow>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Workflow> = inner
            .workflows
            .values()
            .filter(|w| &w.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|w| w.created_at);
        Ok(out)
    }

    async fn list_jobs_for_workflow(&self, workflow_id: WorkflowId) -> StoreResult<Vec<Job>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.workflow_id == workflow_id)
            .cloned()
            .collect();
        out.sort_by_key(|j| {
            let branch_name = inner
                .branches
                .get(&j.branch_id)
                .map(|b| b.name.clone())
                .unwrap_or_default();
            (branch_name, j.order_index)
        });
        Ok(out)
    }

    async fn predecessor(&self, job: &Job) -> StoreResult<Option<Job>> {
        if job.order_index == 0 {
            return Ok(None);
        }
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .values()
            .find(|p| p.branch_id == job.branch_id && p.order_index == job.order_index - 1)
            .cloned())
    }

    async fn mark_running(&self, id: JobId, started_at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.status = JobStatus::Running;
            job.started_at = Some(started_at);
        }
        Ok(())
    }

    async fn mark_succeeded(&self, id: JobId, finished_at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Succeeded;
                job.progress = 1.0;
                job.finished_at = Some(finished_at);
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, finished_at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Failed;
                job.finished_at = Some(finished_at);
            }
        }
        Ok(())
    }

    async fn mark_cancelled(&self, id: JobId, finished_at: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(finished_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        id: JobId,
        progress: f64,
        processed_tiles: Option<i32>,
        total_tiles: Option<i32>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&id) {
            if job.status == JobStatus::Running {
                job.progress = progress;
                job.processed_tiles = processed_tiles;
                job.total_tiles = total_tiles;
            }
        }
        Ok(())
    }

    async fn truncate_all(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.workflows.clear();
        inner.branches.clear();
        inner.jobs.clear();
        Ok(())
    }
}
