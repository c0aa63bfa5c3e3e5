use crate::descriptor::ResourceDescriptor;
use crate::error::{LoadProgress, LoadResourceStatus};
use crate::handle::{AssetHandle, BundleHandle};
use crate::pool::{FreeList, Recyclable};
use log::{debug, warn};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use web_time::Instant;

/// Serial id of a load task. Strictly increasing per loader, so it doubles
/// as the FIFO tie-break between tasks of equal priority.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Opaque value handed back to every callback of a request.
pub type UserData = Option<Rc<dyn Any>>;

pub type LoadAssetSuccessCallback = Rc<dyn Fn(&str, AssetHandle, f32, &UserData)>;
pub type LoadAssetFailureCallback = Rc<dyn Fn(&str, LoadResourceStatus, &str, &UserData)>;
pub type LoadAssetProgressCallback = Rc<dyn Fn(&str, LoadProgress, f32, &UserData)>;
pub type LoadAssetDependencyCallback = Rc<dyn Fn(&str, &str, usize, usize, &UserData)>;

/// Callbacks of one asset or scene request.
/// They run on the thread calling `ResourceLoader::update` and must not call
/// back into the loader.
#[derive(Clone)]
pub struct LoadAssetCallbacks {
    success: LoadAssetSuccessCallback,
    failure: Option<LoadAssetFailureCallback>,
    progress: Option<LoadAssetProgressCallback>,
    dependency: Option<LoadAssetDependencyCallback>,
}

impl LoadAssetCallbacks {
    pub fn new(success: impl Fn(&str, AssetHandle, f32, &UserData) + 'static) -> Self {
        LoadAssetCallbacks {
            success: Rc::new(success),
            failure: None,
            progress: None,
            dependency: None,
        }
    }

    pub fn with_failure(
        mut self,
        failure: impl Fn(&str, LoadResourceStatus, &str, &UserData) + 'static,
    ) -> Self {
        self.failure = Some(Rc::new(failure));
        self
    }

    pub fn with_progress(
        mut self,
        progress: impl Fn(&str, LoadProgress, f32, &UserData) + 'static,
    ) -> Self {
        self.progress = Some(Rc::new(progress));
        self
    }

    /// `(asset, dependency, loaded, total)`
    pub fn with_dependency(
        mut self,
        dependency: impl Fn(&str, &str, usize, usize, &UserData) + 'static,
    ) -> Self {
        self.dependency = Some(Rc::new(dependency));
        self
    }

    pub(crate) fn fail(
        &self,
        name: &str,
        status: LoadResourceStatus,
        message: &str,
        user_data: &UserData,
    ) {
        if let Some(failure) = &self.failure {
            failure(name, status, message, user_data);
        }
    }
}

pub type LoadSceneCallbacks = LoadAssetCallbacks;

/// Parameters of `ResourceLoader::load_asset`.
pub struct LoadAssetRequest {
    pub asset_name: String,
    pub asset_type: Option<TypeId>,
    pub priority: i32,
    /// Explicit dependency list. `None` takes it from the catalog.
    pub dependencies: Option<Vec<String>>,
    pub user_data: UserData,
}

impl LoadAssetRequest {
    pub fn new(asset_name: impl Into<String>) -> Self {
        LoadAssetRequest {
            asset_name: asset_name.into(),
            asset_type: None,
            priority: 0,
            dependencies: None,
            user_data: None,
        }
    }

    pub fn with_type<T: 'static>(mut self) -> Self {
        self.asset_type = Some(TypeId::of::<T>());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    pub fn with_user_data(mut self, user_data: impl Any) -> Self {
        self.user_data = Some(Rc::new(user_data));
        self
    }
}

#[derive(Clone, Default)]
pub(crate) enum TaskKind {
    #[default]
    Vacant,
    Asset(LoadAssetCallbacks),
    Scene(LoadSceneCallbacks),
    /// Resolves one dependency and forwards the handle into `main`.
    Dependency { main: TaskId },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[default]
    Todo,
    Doing,
    Done,
}

/// Snapshot of a task for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub serial_id: TaskId,
    pub priority: i32,
    pub asset_name: String,
    pub status: TaskStatus,
    pub description: String,
}

#[derive(Default)]
pub(crate) struct LoadTask {
    pub id: TaskId,
    pub priority: i32,
    pub asset_name: String,
    pub asset_type: Option<TypeId>,
    pub resource: Option<Arc<ResourceDescriptor>>,
    pub dependency_asset_names: Vec<String>,
    pub dependency_assets: Vec<AssetHandle>,
    pub bundle: Option<BundleHandle>,
    pub start_time: Option<Instant>,
    pub status: TaskStatus,
    pub total_dependency_asset_count: usize,
    pub user_data: UserData,
    pub kind: TaskKind,
}

impl Recyclable for LoadTask {
    fn clear(&mut self) {
        self.id = TaskId::default();
        self.priority = 0;
        self.asset_name.clear();
        self.asset_type = None;
        self.resource = None;
        self.dependency_asset_names.clear();
        self.dependency_assets.clear();
        self.bundle = None;
        self.start_time = None;
        self.status = TaskStatus::Todo;
        self.total_dependency_asset_count = 0;
        self.user_data = None;
        self.kind = TaskKind::Vacant;
    }
}

impl LoadTask {
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn is_scene(&self) -> bool {
        matches!(self.kind, TaskKind::Scene(_))
    }

    pub fn loaded_dependency_asset_count(&self) -> usize {
        self.dependency_assets.len()
    }

    /// True once every created dependency task has forwarded its handle.
    pub fn dependencies_resolved(&self) -> bool {
        self.dependency_assets.len() >= self.total_dependency_asset_count
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.start_time
            .map(|start| start.elapsed().as_secs_f32())
            .unwrap_or(0.0)
    }

    pub fn description(&self) -> String {
        match self.kind {
            TaskKind::Dependency { main } => {
                format!("Dependency '{}' of {}", self.asset_name, main)
            }
            TaskKind::Scene(_) => format!("Scene '{}'", self.asset_name),
            _ => format!("Asset '{}'", self.asset_name),
        }
    }
}

/// Everything needed to create a task.
pub(crate) struct TaskSeed {
    pub priority: i32,
    pub asset_name: String,
    pub asset_type: Option<TypeId>,
    pub resource: Arc<ResourceDescriptor>,
    pub dependency_asset_names: Vec<String>,
    pub user_data: UserData,
    pub kind: TaskKind,
}

/// Owns every live task plus the ordered waiting queue.
pub(crate) struct TaskStore {
    next_serial: u64,
    tasks: HashMap<TaskId, LoadTask>,
    // Sorted by priority (highest first), then serial id.
    waiting: Vec<TaskId>,
    free: FreeList<LoadTask>,
    // Failed tasks that still have live dependency tasks.
    failed: HashSet<TaskId>,
    // Asset claims nobody holds any more. The loader gives them back.
    orphaned_claims: Vec<AssetHandle>,
}

impl TaskStore {
    pub fn new() -> Self {
        TaskStore {
            next_serial: 0,
            tasks: HashMap::new(),
            waiting: Vec::new(),
            free: FreeList::new(),
            failed: HashSet::new(),
            orphaned_claims: Vec::new(),
        }
    }

    pub fn create(&mut self, seed: TaskSeed) -> TaskId {
        self.next_serial += 1;
        let id = TaskId(self.next_serial);

        let mut task = self.free.acquire();
        task.id = id;
        task.priority = seed.priority;
        task.asset_name = seed.asset_name;
        task.asset_type = seed.asset_type;
        task.resource = Some(seed.resource);
        task.dependency_asset_names = seed.dependency_asset_names;
        task.user_data = seed.user_data;
        task.kind = seed.kind;

        debug!("Created {}: {}", id, task.description());
        self.tasks.insert(id, task);
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&LoadTask> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut LoadTask> {
        self.tasks.get_mut(&id)
    }

    pub fn enqueue(&mut self, id: TaskId) {
        let Some(priority) = self.tasks.get(&id).map(|task| task.priority) else {
            return;
        };
        let tasks = &self.tasks;
        let position = self.waiting.partition_point(|other| {
            let other_priority = tasks.get(other).map(|task| task.priority).unwrap_or(i32::MIN);
            other_priority > priority || (other_priority == priority && *other < id)
        });
        self.waiting.insert(position, id);
    }

    pub fn waiting(&self) -> Vec<TaskId> {
        self.waiting.clone()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn remove_waiting(&mut self, id: TaskId) {
        self.waiting.retain(|other| *other != id);
    }

    pub fn is_done(&self, id: TaskId) -> bool {
        self.tasks.get(&id).map(LoadTask::is_done).unwrap_or(true)
    }

    /// Drops a task and returns its slot to the free list.
    pub fn finish(&mut self, id: TaskId) {
        self.remove_waiting(id);
        if let Some(task) = self.tasks.remove(&id) {
            debug!("Finished {}", id);
            let parent = match task.kind {
                TaskKind::Dependency { main } => Some(main),
                _ => None,
            };
            self.free.recycle(task);
            self.forget_failed(id);
            if let Some(main) = parent {
                self.forget_failed(main);
            }
        }
    }

    // Drops a failed task from the set once no dependency task points at it.
    fn forget_failed(&mut self, id: TaskId) {
        if !self.failed.contains(&id) {
            return;
        }
        let has_children = self
            .tasks
            .values()
            .any(|task| matches!(task.kind, TaskKind::Dependency { main } if main == id));
        if !has_children {
            self.failed.remove(&id);
        }
    }

    /// Claims taken for tasks that failed before using them.
    pub fn take_orphaned_claims(&mut self) -> Vec<AssetHandle> {
        std::mem::take(&mut self.orphaned_claims)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free.free_count()
    }

    pub fn report_success(&mut self, id: TaskId, asset: AssetHandle) {
        let Some(task) = self.tasks.get_mut(&id) else {
            warn!("Success reported for unknown {}", id);
            return;
        };
        if task.is_done() {
            warn!("{} is already done, giving back {}", id, asset);
            self.orphaned_claims.push(asset);
            return;
        }
        task.status = TaskStatus::Done;

        match &task.kind {
            TaskKind::Asset(callbacks) | TaskKind::Scene(callbacks) => {
                (callbacks.success)(
                    &task.asset_name,
                    asset,
                    task.elapsed_seconds(),
                    &task.user_data,
                );
            }
            TaskKind::Dependency { main } => {
                let main = *main;
                let dependency_name = task.asset_name.clone();
                self.forward_dependency(main, &dependency_name, asset);
            }
            TaskKind::Vacant => {}
        }
    }

    fn forward_dependency(&mut self, main: TaskId, dependency_name: &str, asset: AssetHandle) {
        if self.failed.contains(&main) {
            debug!(
                "Main {} of dependency '{}' failed, giving back {}",
                main, dependency_name, asset
            );
            self.orphaned_claims.push(asset);
            return;
        }
        // A main task finished from the cache keeps the claims of its
        // dependencies; unloading it gives them back.
        let Some(task) = self.tasks.get_mut(&main) else {
            debug!("Main {} of dependency '{}' is gone", main, dependency_name);
            return;
        };
        if task.is_done() {
            return;
        }

        task.dependency_assets.push(asset);
        if let TaskKind::Asset(callbacks) | TaskKind::Scene(callbacks) = &task.kind {
            if let Some(dependency) = &callbacks.dependency {
                dependency(
                    &task.asset_name,
                    dependency_name,
                    task.loaded_dependency_asset_count(),
                    task.total_dependency_asset_count,
                    &task.user_data,
                );
            }
        }
    }

    /// Marks the task done and fires its failure exactly once.
    /// A failed dependency fails its main task with `DependencyError`.
    pub fn report_failure(&mut self, id: TaskId, status: LoadResourceStatus, message: &str) {
        let Some(task) = self.tasks.get_mut(&id) else {
            warn!("Failure reported for unknown {}", id);
            return;
        };
        if task.is_done() {
            return;
        }
        task.status = TaskStatus::Done;
        self.orphaned_claims.append(&mut task.dependency_assets);
        self.failed.insert(id);

        match &task.kind {
            TaskKind::Asset(callbacks) | TaskKind::Scene(callbacks) => {
                callbacks.fail(&task.asset_name, status, message, &task.user_data);
            }
            TaskKind::Dependency { main } => {
                let main = *main;
                let dependency_name = task.asset_name.clone();
                let main_name = self
                    .tasks
                    .get(&main)
                    .map(|task| task.asset_name.clone())
                    .unwrap_or_default();
                let message = format!(
                    "Can not load dependency asset '{}' when load asset '{}', internal status '{}', internal error message '{}'.",
                    dependency_name, main_name, status, message
                );
                self.report_failure(main, LoadResourceStatus::DependencyError, &message);
            }
            TaskKind::Vacant => {}
        }
    }

    pub fn report_progress(&self, id: TaskId, stage: LoadProgress, fraction: f32) {
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        if let TaskKind::Asset(callbacks) | TaskKind::Scene(callbacks) = &task.kind {
            if let Some(progress) = &callbacks.progress {
                progress(&task.asset_name, stage, fraction, &task.user_data);
            }
        }
    }

    /// Fails every unfinished request task with `status` and drops all tasks.
    /// Dependency tasks are dropped silently.
    pub fn fail_all(&mut self, status: LoadResourceStatus, message: &str) {
        let mut ids = self.tasks.keys().copied().collect::<Vec<_>>();
        ids.sort();
        for id in &ids {
            let is_request = self
                .tasks
                .get(id)
                .map(|task| !matches!(task.kind, TaskKind::Dependency { .. }))
                .unwrap_or(false);
            if is_request {
                self.report_failure(*id, status, message);
            }
        }
        for id in ids {
            self.finish(id);
        }
        self.orphaned_claims.clear();
    }

    pub fn infos(&self) -> Vec<TaskInfo> {
        let mut infos = self
            .tasks
            .values()
            .map(|task| TaskInfo {
                serial_id: task.id,
                priority: task.priority,
                asset_name: task.asset_name.clone(),
                status: task.status,
                description: task.description(),
            })
            .collect::<Vec<_>>();
        infos.sort_by_key(|info| info.serial_id);
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{LoadType, ResourceName};
    use std::cell::RefCell;

    fn resource() -> Arc<ResourceDescriptor> {
        Arc::new(ResourceDescriptor::new(ResourceName::new("bundle", None, "dat"), LoadType::FromFile).ready())
    }

    fn seed(name: &str, priority: i32, kind: TaskKind) -> TaskSeed {
        TaskSeed {
            priority,
            asset_name: name.to_string(),
            asset_type: None,
            resource: resource(),
            dependency_asset_names: Vec::new(),
            user_data: None,
            kind,
        }
    }

    fn recording_callbacks(log: &Rc<RefCell<Vec<String>>>) -> LoadAssetCallbacks {
        let success_log = log.clone();
        let failure_log = log.clone();
        let dependency_log = log.clone();
        LoadAssetCallbacks::new(move |name, asset, _, _| {
            success_log.borrow_mut().push(format!("ok {} {}", name, asset));
        })
        .with_failure(move |name, status, _, _| {
            failure_log.borrow_mut().push(format!("fail {} {}", name, status));
        })
        .with_dependency(move |name, dependency, loaded, total, _| {
            dependency_log
                .borrow_mut()
                .push(format!("dep {} {} {}/{}", name, dependency, loaded, total));
        })
    }

    #[test]
    fn waiting_queue_orders_by_priority_then_serial() {
        let mut store = TaskStore::new();
        let low = store.create(seed("low", 0, TaskKind::Vacant));
        let high = store.create(seed("high", 5, TaskKind::Vacant));
        let low_later = store.create(seed("low-later", 0, TaskKind::Vacant));
        let high_later = store.create(seed("high-later", 5, TaskKind::Vacant));
        for id in [low_later, low, high_later, high] {
            store.enqueue(id);
        }

        assert_eq!(store.waiting(), vec![high, high_later, low, low_later]);
        assert!(low < low_later);
    }

    #[test]
    fn dependency_success_feeds_main_task() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut store = TaskStore::new();
        let main = store.create(seed("a", 0, TaskKind::Asset(recording_callbacks(&log))));
        let first = store.create(seed("b", 0, TaskKind::Dependency { main }));
        let second = store.create(seed("c", 0, TaskKind::Dependency { main }));
        store.get_mut(main).unwrap().total_dependency_asset_count = 2;

        store.report_success(first, AssetHandle::from_raw(2));
        assert!(!store.get(main).unwrap().dependencies_resolved());
        store.report_success(second, AssetHandle::from_raw(3));

        let task = store.get(main).unwrap();
        assert!(task.dependencies_resolved());
        assert_eq!(task.loaded_dependency_asset_count(), 2);
        assert_eq!(*log.borrow(), vec!["dep a b 1/2", "dep a c 2/2"]);
    }

    #[test]
    fn dependency_failure_fails_main_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut store = TaskStore::new();
        let main = store.create(seed("a", 0, TaskKind::Asset(recording_callbacks(&log))));
        let first = store.create(seed("b", 0, TaskKind::Dependency { main }));
        let second = store.create(seed("c", 0, TaskKind::Dependency { main }));
        store.get_mut(main).unwrap().total_dependency_asset_count = 2;

        store.report_failure(first, LoadResourceStatus::NotExist, "missing");
        store.report_failure(second, LoadResourceStatus::NotExist, "missing");
        store.report_success(second, AssetHandle::from_raw(3));

        assert!(store.is_done(main));
        assert_eq!(*log.borrow(), vec!["fail a DependencyError"]);
    }

    #[test]
    fn failed_main_hands_back_dependency_claims() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut store = TaskStore::new();
        let main = store.create(seed("a", 0, TaskKind::Asset(recording_callbacks(&log))));
        let first = store.create(seed("b", 0, TaskKind::Dependency { main }));
        let second = store.create(seed("c", 0, TaskKind::Dependency { main }));
        let third = store.create(seed("d", 0, TaskKind::Dependency { main }));
        store.get_mut(main).unwrap().total_dependency_asset_count = 3;

        store.report_success(first, AssetHandle::from_raw(2));
        store.report_failure(second, LoadResourceStatus::AssetError, "broken");
        assert_eq!(store.take_orphaned_claims(), vec![AssetHandle::from_raw(2)]);
        assert!(store.get(main).unwrap().is_done());
        assert_eq!(store.get(main).unwrap().status, TaskStatus::Done);

        // Late arrivals for the failed main are handed back too, even after
        // the main task itself is gone.
        store.finish(main);
        store.report_success(third, AssetHandle::from_raw(4));
        assert_eq!(store.take_orphaned_claims(), vec![AssetHandle::from_raw(4)]);
        assert!(store.take_orphaned_claims().is_empty());
    }

    #[test]
    fn finished_slots_are_recycled() {
        let mut store = TaskStore::new();
        let id = store.create(seed("a", 0, TaskKind::Vacant));
        store.enqueue(id);
        store.finish(id);

        assert_eq!(store.len(), 0);
        assert_eq!(store.waiting_count(), 0);
        assert_eq!(store.free_slots(), 1);

        let next = store.create(seed("b", 0, TaskKind::Vacant));
        assert!(next > id);
        assert_eq!(store.free_slots(), 0);
        assert_eq!(store.get(next).unwrap().asset_name, "b");
    }

    #[test]
    fn fail_all_skips_dependency_tasks() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut store = TaskStore::new();
        let main = store.create(seed("a", 0, TaskKind::Asset(recording_callbacks(&log))));
        store.create(seed("b", 0, TaskKind::Dependency { main }));

        store.fail_all(LoadResourceStatus::NotReady, "shutting down");

        assert_eq!(*log.borrow(), vec!["fail a NotReady"]);
        assert_eq!(store.len(), 0);
    }
}
