use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{IDLE_EVICTION, STALE_TIME};
use crate::error::{TaskError, TaskResult};
use crate::models::{QueryDescriptor, RemoteChange, RemoteEvent, StatusFilter, Task, TaskCounts, TaskPatch};

/// One cached list, ordered for its descriptor.
#[derive(Debug, Clone)]
pub struct CachedView {
    pub tasks: Vec<Task>,
    fetched_at: Instant,
    last_read: Instant,
    /// Set when a change elsewhere may have made this list out of date.
    stale: bool,
}

impl CachedView {
    fn new(tasks: Vec<Task>) -> Self {
        let now = Instant::now();
        Self {
            tasks,
            fetched_at: now,
            last_read: now,
            stale: false,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }
}

/// Identifies one list request. Only the newest ticket for the active
/// descriptor may write its response into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    descriptor: QueryDescriptor,
    generation: u64,
}

impl FetchTicket {
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    Update(TaskPatch),
    Delete,
}

/// The task as it was before an optimistic change, and where it sat.
#[derive(Debug)]
struct PreImage {
    task: Task,
    /// Id of the task that followed it, used to find its slot again
    next_id: Option<String>,
}

#[derive(Debug)]
struct PendingMutation {
    kind: MutationKind,
    descriptor: QueryDescriptor,
    /// `None` when the task was not in a cached view at dispatch time.
    pre_image: Option<PreImage>,
    seq: u64,
}

/// Handle for an optimistic change awaiting its remote result.
#[derive(Debug, PartialEq, Eq)]
pub struct MutationToken {
    id: String,
    seq: u64,
}

impl MutationToken {
    pub fn task_id(&self) -> &str {
        &self.id
    }
}

/// What happened to a remote event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// Insert for an id that is already in the view
    Duplicate,
    /// Update or delete for an id that is not in the view
    Absent,
    /// Insert that does not satisfy the active view's filters
    Filtered,
    /// Active view not loaded yet
    NotCached,
    /// Owner tag missing or not the active user
    Foreign,
    /// A local mutation on the same id is in flight
    Deferred,
    SignedOut,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Absent => "absent",
            Self::Filtered => "filtered",
            Self::NotCached => "not_cached",
            Self::Foreign => "foreign",
            Self::Deferred => "deferred",
            Self::SignedOut => "signed_out",
        }
    }
}

/// Client-side view of the task list, partitioned by query descriptor.
///
/// Plain synchronous state: every method is one atomic step. The async
/// choreography around it lives in [`Reconciler`](super::Reconciler).
#[derive(Debug)]
pub struct TaskCache {
    user_id: Option<String>,
    active: QueryDescriptor,
    views: HashMap<QueryDescriptor, CachedView>,
    pending: HashMap<String, PendingMutation>,
    /// Newest outstanding list request per descriptor
    fetch_generations: HashMap<QueryDescriptor, u64>,
    next_seq: u64,
    /// Lazily recomputed aggregates; `None` means invalidated
    counts: Option<TaskCounts>,
    stale_time: Duration,
    idle_eviction: Duration,
}

impl Default for TaskCache {
    fn default() -> Self {
        Self::new(STALE_TIME, IDLE_EVICTION)
    }
}

impl TaskCache {
    pub fn new(stale_time: Duration, idle_eviction: Duration) -> Self {
        Self {
            user_id: None,
            active: QueryDescriptor::default(),
            views: HashMap::new(),
            pending: HashMap::new(),
            fetch_generations: HashMap::new(),
            next_seq: 0,
            counts: None,
            stale_time,
            idle_eviction,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    // ===== Identity and active query =====

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Switching identity throws away everything cached for the old one.
    /// Returns whether the identity changed.
    pub fn set_user(&mut self, user_id: Option<&str>) -> bool {
        if self.user_id.as_deref() == user_id {
            return false;
        }
        self.clear();
        self.user_id = user_id.map(str::to_string);
        true
    }

    pub fn active(&self) -> &QueryDescriptor {
        &self.active
    }

    pub fn set_active(&mut self, descriptor: QueryDescriptor) {
        if self.active != descriptor {
            self.active = descriptor;
            self.counts = None;
        }
    }

    // ===== Reads =====

    pub fn needs_fetch(&self, descriptor: &QueryDescriptor) -> bool {
        match self.views.get(descriptor) {
            None => true,
            Some(view) => view.stale || view.fetched_at.elapsed() >= self.stale_time,
        }
    }

    pub fn is_cached(&self, descriptor: &QueryDescriptor) -> bool {
        self.views.contains_key(descriptor)
    }

    pub fn is_stale(&self, descriptor: &QueryDescriptor) -> bool {
        self.views.get(descriptor).map(|v| v.stale).unwrap_or(false)
    }

    /// Snapshot of a view. Counts as an access for idle eviction.
    pub fn read(&mut self, descriptor: &QueryDescriptor) -> Option<Vec<Task>> {
        let view = self.views.get_mut(descriptor)?;
        view.last_read = Instant::now();
        Some(view.tasks.clone())
    }

    pub fn active_tasks(&mut self) -> Vec<Task> {
        let active = self.active.clone();
        self.read(&active).unwrap_or_default()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    // ===== Fetches =====

    pub fn begin_fetch(&mut self, descriptor: &QueryDescriptor) -> FetchTicket {
        let generation = self.next_seq();
        self.fetch_generations.insert(descriptor.clone(), generation);
        FetchTicket {
            descriptor: descriptor.clone(),
            generation,
        }
    }

    /// Store a list response. Returns `false` (and stores nothing) when the
    /// response no longer matches what the user is looking at.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, tasks: Vec<Task>) -> bool {
        if ticket.descriptor != self.active {
            return false;
        }
        if self.fetch_generations.get(&ticket.descriptor) != Some(&ticket.generation) {
            return false;
        }
        self.fetch_generations.remove(&ticket.descriptor);

        let mut seen = HashSet::with_capacity(tasks.len());
        let tasks: Vec<Task> = tasks
            .into_iter()
            .filter(|t| seen.insert(t.id.clone()))
            .collect();

        self.views.insert(ticket.descriptor, CachedView::new(tasks));
        self.counts = None;
        true
    }

    fn cancel_fetch(&mut self, descriptor: &QueryDescriptor) {
        self.fetch_generations.remove(descriptor);
    }

    // ===== Local mutations =====

    /// Add a task the store has just created to every view whose filters it
    /// satisfies. Returns how many views took it.
    pub fn insert_created(&mut self, task: &Task) -> usize {
        let mut inserted = 0;
        for (descriptor, view) in self.views.iter_mut() {
            if !descriptor.matches(task) || view.contains(&task.id) {
                continue;
            }
            let index = descriptor.insertion_index(&view.tasks, task);
            view.tasks.insert(index, task.clone());
            inserted += 1;
        }
        self.counts = None;
        inserted
    }

    fn begin_mutation(&mut self, id: &str, kind: MutationKind) -> TaskResult<MutationToken> {
        if self.pending.contains_key(id) {
            return Err(TaskError::validation(format!(
                "a change to task {} is already in flight",
                id
            )));
        }

        let descriptor = self.active.clone();
        let mut pre_image = None;

        if let Some(view) = self.views.get_mut(&descriptor) {
            if let Some(index) = view.tasks.iter().position(|t| t.id == id) {
                pre_image = Some(PreImage {
                    task: view.tasks[index].clone(),
                    next_id: view.tasks.get(index + 1).map(|t| t.id.clone()),
                });
                match &kind {
                    MutationKind::Update(patch) => view.tasks[index].apply_patch(patch),
                    MutationKind::Delete => {
                        view.tasks.remove(index);
                    }
                }
            }
        }

        // A list response already in flight predates this change
        self.cancel_fetch(&descriptor);
        self.mark_stale_where(|d, v| *d != descriptor && v.contains(id));
        self.counts = None;

        let seq = self.next_seq();
        self.pending.insert(
            id.to_string(),
            PendingMutation {
                kind,
                descriptor,
                pre_image,
                seq,
            },
        );
        Ok(MutationToken {
            id: id.to_string(),
            seq,
        })
    }

    /// Remember the task, then patch it in place in the active view.
    pub fn begin_update(&mut self, id: &str, patch: &TaskPatch) -> TaskResult<MutationToken> {
        self.begin_mutation(id, MutationKind::Update(patch.clone()))
    }

    /// Remember the task and its slot, then remove it from the active view.
    pub fn begin_delete(&mut self, id: &str) -> TaskResult<MutationToken> {
        self.begin_mutation(id, MutationKind::Delete)
    }

    /// The remote call succeeded: the optimistic state stands.
    pub fn commit(&mut self, token: MutationToken) -> Option<MutationKind> {
        self.take_pending(&token).map(|pending| pending.kind)
    }

    /// The remote call failed: put this one task back as it was. Changes to
    /// other tasks made meanwhile are left alone, so with no other activity
    /// the view ends up exactly as it was before the mutation.
    ///
    /// Returns `false` if there was nothing to restore (e.g. the user signed
    /// out meanwhile).
    pub fn rollback(&mut self, token: MutationToken) -> bool {
        let Some(pending) = self.take_pending(&token) else {
            return false;
        };
        let Some(pre_image) = pending.pre_image else {
            return false;
        };
        let Some(view) = self.views.get_mut(&pending.descriptor) else {
            return false;
        };

        let restored = match pending.kind {
            MutationKind::Update(_) => match view.tasks.iter_mut().find(|t| t.id == pre_image.task.id) {
                Some(task) => {
                    *task = pre_image.task;
                    true
                }
                None => false,
            },
            MutationKind::Delete if view.contains(&pre_image.task.id) => false,
            MutationKind::Delete => {
                let index = restore_slot(&pending.descriptor, &view.tasks, &pre_image);
                view.tasks.insert(index, pre_image.task);
                true
            }
        };
        if restored {
            self.counts = None;
        }
        restored
    }

    fn take_pending(&mut self, token: &MutationToken) -> Option<PendingMutation> {
        match self.pending.get(&token.id) {
            Some(pending) if pending.seq == token.seq => self.pending.remove(&token.id),
            _ => None,
        }
    }

    // ===== Remote events =====

    /// Fold a change notification into the active view.
    pub fn merge(&mut self, event: &RemoteEvent) -> MergeOutcome {
        let Some(user_id) = self.user_id.as_deref() else {
            return MergeOutcome::SignedOut;
        };
        if !event.is_owned_by(user_id) {
            return MergeOutcome::Foreign;
        }
        // Local edits win until they resolve
        if self.pending.contains_key(event.task_id()) {
            return MergeOutcome::Deferred;
        }

        let active = self.active.clone();
        let outcome = match self.views.get_mut(&active) {
            None => MergeOutcome::NotCached,
            Some(view) => apply_change(&active, view, &event.change),
        };

        // Other partitions catch up lazily on their next read
        let touched = self.mark_stale_where(|d, v| *d != active && affects(d, v, &event.change));
        if outcome == MergeOutcome::Applied || touched > 0 {
            self.counts = None;
        }
        outcome
    }

    // ===== Aggregates and housekeeping =====

    /// Totals from a fresh unfiltered view (the active one if it qualifies),
    /// otherwise from the active view. Cached until the next change.
    pub fn counts(&mut self) -> TaskCounts {
        if let Some(counts) = self.counts {
            return counts;
        }
        let usable = |d: &QueryDescriptor, v: &CachedView| {
            !v.stale && d.search.is_empty() && d.status == StatusFilter::All
        };
        let active = self.views.get(&self.active);
        let source = active
            .filter(|v| usable(&self.active, v))
            .or_else(|| self.views.iter().find(|(d, v)| usable(d, v)).map(|(_, v)| v))
            .or(active);
        let counts = source
            .map(|v| TaskCounts::from_tasks(&v.tasks))
            .unwrap_or_default();
        self.counts = Some(counts);
        counts
    }

    /// Drop views nobody has read for the idle window. The active view stays.
    pub fn evict_idle(&mut self) -> usize {
        let before = self.views.len();
        let active = self.active.clone();
        let idle_eviction = self.idle_eviction;
        self.views
            .retain(|d, v| *d == active || v.last_read.elapsed() < idle_eviction);
        let evicted = before - self.views.len();
        if evicted > 0 {
            self.counts = None;
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.views.clear();
        self.pending.clear();
        self.fetch_generations.clear();
        self.counts = None;
    }

    fn mark_stale_where(&mut self, predicate: impl Fn(&QueryDescriptor, &CachedView) -> bool) -> usize {
        let mut marked = 0;
        for (descriptor, view) in self.views.iter_mut() {
            if predicate(descriptor, view) {
                view.stale = true;
                marked += 1;
            }
        }
        marked
    }
}

/// Where a removed task goes back: in front of the task that used to follow
/// it, or wherever the sort puts it once that neighbour is gone too.
fn restore_slot(descriptor: &QueryDescriptor, tasks: &[Task], pre_image: &PreImage) -> usize {
    match &pre_image.next_id {
        None => tasks.len(),
        Some(next_id) => tasks
            .iter()
            .position(|t| t.id == *next_id)
            .unwrap_or_else(|| descriptor.insertion_index(tasks, &pre_image.task)),
    }
}

/// Whether `change` could alter what a view for `descriptor` holds.
fn affects(descriptor: &QueryDescriptor, view: &CachedView, change: &RemoteChange) -> bool {
    match change {
        RemoteChange::Inserted(task) => descriptor.matches(task) && !view.contains(&task.id),
        RemoteChange::Updated(task) => match view.tasks.iter().find(|t| t.id == task.id) {
            Some(existing) => existing != task,
            None => descriptor.matches(task),
        },
        RemoteChange::Deleted { id } => view.contains(id),
    }
}

fn apply_change(descriptor: &QueryDescriptor, view: &mut CachedView, change: &RemoteChange) -> MergeOutcome {
    match change {
        RemoteChange::Inserted(task) => {
            if view.contains(&task.id) {
                MergeOutcome::Duplicate
            } else if !descriptor.matches(task) {
                MergeOutcome::Filtered
            } else {
                let index = descriptor.insertion_index(&view.tasks, task);
                view.tasks.insert(index, task.clone());
                MergeOutcome::Applied
            }
        }
        RemoteChange::Updated(task) => match view.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => {
                existing.absorb(task);
                MergeOutcome::Applied
            }
            None => MergeOutcome::Absent,
        },
        RemoteChange::Deleted { id } => {
            let before = view.tasks.len();
            view.tasks.retain(|t| t.id != *id);
            if view.tasks.len() < before {
                MergeOutcome::Applied
            } else {
                MergeOutcome::Absent
            }
        }
    }
}
