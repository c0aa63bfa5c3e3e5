use crate::config::{regular_path, LoaderConfig};
use crate::descriptor::{LoadType, ResourceDescriptor};
use crate::error::{LoadResourceStatus, ResourceError};
use crate::handle::{AssetHandle, BundleHandle, ReleaseTarget};
use crate::helper::{
    DecryptContext, DecryptResourceCallback, FromHelperMessage, HelperEvent, HelperRequest,
    InstantiateRequest, OperationTicket, ReadTarget, ResourceHelper, ToHelperMessage,
};
use crate::record::ResidentCache;
use crate::task::{TaskId, TaskStatus, TaskStore};
use crossbeam_channel::Sender;
use log::{debug, error, warn};
use std::collections::{HashMap, HashSet};
use web_time::Instant;

/// Outcome of `LoadAgent::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartTaskStatus {
    /// The task finished synchronously.
    Done,
    /// The task is in flight and owns the agent until it is done.
    CanResume,
    /// A precondition is unmet. Retry on a later tick.
    HasToWait,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    #[default]
    Idle,
    Starting,
    WaitingOnReadiness,
    WaitingOnAsset,
    WaitingOnDependency,
    WaitingOnBundle,
    ReadingFile,
    ReadingBytes,
    Parsing,
    Instantiating,
    Done,
}

/// State shared by all agents of one loader.
pub(crate) struct LoaderState {
    pub config: LoaderConfig,
    pub cache: ResidentCache,
    pub loading_assets: HashSet<String>,
    pub loading_bundles: HashSet<String>,
    pub cached_paths: HashMap<String, String>,
    pub sender: Sender<ToHelperMessage>,
    pub resource_helper: Box<dyn ResourceHelper>,
    pub decrypt: DecryptResourceCallback,
}

impl LoaderState {
    /// Full path of the bundle file, or of the file system holding it.
    /// Computed once per bundle name.
    pub fn full_path(&mut self, resource: &ResourceDescriptor) -> String {
        let bundle_name = resource.name().full_name();
        if let Some(path) = self.cached_paths.get(&bundle_name) {
            return path.clone();
        }

        let entry = match resource.file_system() {
            Some(file_system) => file_system,
            None => bundle_name.as_str(),
        };
        let path = regular_path(self.config.storage_path(resource.storage()), entry);
        self.cached_paths.insert(bundle_name, path.clone());
        path
    }
}

/// Drives one task at a time through cache check, dependency wait,
/// bundle read, parse and instantiate.
pub(crate) struct LoadAgent {
    index: usize,
    state: AgentState,
    task: Option<TaskId>,
    ticket: Option<OperationTicket>,
    next_serial: u64,
    // In-flight markers placed by this agent.
    marked_asset: Option<String>,
    marked_bundle: Option<String>,
}

impl LoadAgent {
    pub fn new(index: usize) -> Self {
        LoadAgent {
            index,
            state: AgentState::Idle,
            task: None,
            ticket: None,
            next_serial: 0,
            marked_asset: None,
            marked_bundle: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    /// Returns the agent to the idle set. The task must already be done.
    pub fn reset(&mut self) {
        self.state = AgentState::Idle;
        self.task = None;
        self.ticket = None;
        self.marked_asset = None;
        self.marked_bundle = None;
    }

    fn park(&mut self, tasks: &mut TaskStore, id: TaskId, state: AgentState) -> StartTaskStatus {
        if let Some(task) = tasks.get_mut(id) {
            task.start_time = None;
            task.status = TaskStatus::Todo;
        }
        debug!("Agent {} parks {} ({:?})", self.index, id, state);
        self.state = state;
        self.task = None;
        StartTaskStatus::HasToWait
    }

    pub fn start(
        &mut self,
        id: TaskId,
        tasks: &mut TaskStore,
        shared: &mut LoaderState,
    ) -> StartTaskStatus {
        let Some(task) = tasks.get_mut(id) else {
            error!("Agent {} got {} which does not exist", self.index, id);
            return StartTaskStatus::Done;
        };
        let Some(resource) = task.resource.clone() else {
            error!("{} has no resource", id);
            tasks.report_failure(id, LoadResourceStatus::NotExist, "Task has no resource.");
            return StartTaskStatus::Done;
        };

        self.task = Some(id);
        self.state = AgentState::Starting;
        task.start_time = Some(Instant::now());

        if !resource.is_ready() {
            return self.park(tasks, id, AgentState::WaitingOnReadiness);
        }

        let asset_name = task.asset_name.clone();
        if shared.loading_assets.contains(&asset_name) {
            return self.park(tasks, id, AgentState::WaitingOnAsset);
        }

        if !task.is_scene() {
            if let Some(asset) = shared.cache.spawn_asset(&asset_name) {
                debug!("Agent {} serves '{}' from cache", self.index, asset_name);
                tasks.report_success(id, asset);
                self.state = AgentState::Done;
                return StartTaskStatus::Done;
            }
        }

        let dependencies_ready = task
            .dependency_asset_names
            .iter()
            .all(|name| shared.cache.can_spawn_asset(name));
        if !dependencies_ready || !task.dependencies_resolved() {
            return self.park(tasks, id, AgentState::WaitingOnDependency);
        }

        let bundle_name = resource.name().full_name();
        if shared.loading_bundles.contains(&bundle_name) {
            return self.park(tasks, id, AgentState::WaitingOnBundle);
        }

        task.status = TaskStatus::Doing;
        shared.loading_assets.insert(asset_name.clone());
        self.marked_asset = Some(asset_name);

        if let Some(bundle) = shared.cache.spawn_bundle(&bundle_name) {
            task.bundle = Some(bundle);
            self.instantiate(id, tasks, shared);
            return self.status_after_dispatch();
        }

        shared.loading_bundles.insert(bundle_name.clone());
        self.marked_bundle = Some(bundle_name.clone());

        let path = shared.full_path(&resource);
        let target = if resource.uses_file_system() {
            ReadTarget::FileSystem {
                file_system: path,
                storage: resource.storage(),
                entry: bundle_name,
            }
        } else {
            ReadTarget::Path(path)
        };

        let (request, state) = match resource.load_type() {
            LoadType::FromFile => (HelperRequest::ReadFile(target), AgentState::ReadingFile),
            LoadType::FromMemory
            | LoadType::FromMemoryAndQuickDecrypt
            | LoadType::FromMemoryAndDecrypt => {
                (HelperRequest::ReadBytes(target), AgentState::ReadingBytes)
            }
        };
        self.state = state;
        self.dispatch(id, request, tasks, shared);
        self.status_after_dispatch()
    }

    fn status_after_dispatch(&self) -> StartTaskStatus {
        if self.state == AgentState::Done {
            StartTaskStatus::Done
        } else {
            StartTaskStatus::CanResume
        }
    }

    fn dispatch(
        &mut self,
        id: TaskId,
        request: HelperRequest,
        tasks: &mut TaskStore,
        shared: &mut LoaderState,
    ) {
        self.next_serial += 1;
        let ticket = OperationTicket::new(self.index, self.next_serial);
        self.ticket = Some(ticket);
        debug!("Agent {} dispatches {} for {}", self.index, ticket, id);

        if shared.sender.send(ToHelperMessage { ticket, request }).is_err() {
            self.ticket = None;
            self.fail(
                id,
                LoadResourceStatus::NotReady,
                "Load resource helper is not connected.",
                tasks,
                shared,
            );
        }
    }

    fn instantiate(&mut self, id: TaskId, tasks: &mut TaskStore, shared: &mut LoaderState) {
        let Some(task) = tasks.get(id) else {
            return;
        };
        let Some(bundle) = task.bundle else {
            self.fail(
                id,
                LoadResourceStatus::NotReady,
                "Bundle is not resident.",
                tasks,
                shared,
            );
            return;
        };

        let request = InstantiateRequest {
            bundle,
            asset_name: task.asset_name.clone(),
            asset_type: task.asset_type,
            is_scene: task.is_scene(),
        };
        self.state = AgentState::Instantiating;
        self.dispatch(id, HelperRequest::LoadAsset(request), tasks, shared);
    }

    /// Routes one completion. Anything not matching the current ticket is stale.
    pub fn handle_event(
        &mut self,
        message: FromHelperMessage,
        tasks: &mut TaskStore,
        shared: &mut LoaderState,
    ) {
        if self.ticket != Some(message.ticket) {
            warn!(
                "Agent {} discards stale completion {}",
                self.index, message.ticket
            );
            return;
        }
        let Some(id) = self.task else {
            return;
        };

        // The ticket stays set until the pipeline moves on, so a failing
        // stage can still be reset on the helper side.
        match message.event {
            HelperEvent::ReadFileComplete(bundle) | HelperEvent::ParseBytesComplete(bundle) => {
                self.on_bundle_ready(id, bundle, tasks, shared)
            }
            HelperEvent::ReadBytesComplete(bytes) => self.on_bytes_read(id, bytes, tasks, shared),
            HelperEvent::LoadComplete(asset) => self.on_asset_ready(id, asset, tasks, shared),
            HelperEvent::Error(status, message) => self.fail(id, status, &message, tasks, shared),
            HelperEvent::Progress(stage, fraction) => tasks.report_progress(id, stage, fraction),
        }
    }

    fn on_bytes_read(
        &mut self,
        id: TaskId,
        mut bytes: Vec<u8>,
        tasks: &mut TaskStore,
        shared: &mut LoaderState,
    ) {
        let Some(resource) = tasks.get(id).and_then(|task| task.resource.clone()) else {
            return;
        };

        if resource.load_type().needs_decrypt() {
            let name = resource.name();
            let context = DecryptContext {
                start_index: 0,
                length: bytes.len(),
                name: &name.name,
                variant: name.variant.as_deref(),
                extension: &name.extension,
                storage: resource.storage(),
                file_system: resource.file_system(),
                load_type: resource.load_type(),
                total_length: resource.length(),
                hash_code: resource.hash_code(),
            };
            debug!("Agent {} decrypts '{}'", self.index, name);
            (shared.decrypt)(&mut bytes, &context);
        }

        self.state = AgentState::Parsing;
        self.dispatch(id, HelperRequest::ParseBytes(bytes), tasks, shared);
    }

    fn on_bundle_ready(
        &mut self,
        id: TaskId,
        bundle: BundleHandle,
        tasks: &mut TaskStore,
        shared: &mut LoaderState,
    ) {
        let Some(bundle_name) = tasks
            .get(id)
            .and_then(|task| task.resource.as_ref())
            .map(|resource| resource.name().full_name())
        else {
            return;
        };

        if let Err(err) = shared.cache.register_bundle(&bundle_name, bundle) {
            error!("Agent {} can not register bundle: {}", self.index, err);
            shared.resource_helper.release(ReleaseTarget::Bundle(bundle));
            self.fail(id, LoadResourceStatus::NotReady, &err.to_string(), tasks, shared);
            return;
        }
        if let Some(task) = tasks.get_mut(id) {
            task.bundle = Some(bundle);
        }
        if let Some(name) = self.marked_bundle.take() {
            shared.loading_bundles.remove(&name);
        }

        self.instantiate(id, tasks, shared);
    }

    fn on_asset_ready(
        &mut self,
        id: TaskId,
        asset: AssetHandle,
        tasks: &mut TaskStore,
        shared: &mut LoaderState,
    ) {
        let Some(task) = tasks.get(id) else {
            return;
        };
        let Some(bundle) = task.bundle else {
            self.fail(id, LoadResourceStatus::AssetError, "Bundle is not resident.", tasks, shared);
            return;
        };
        let asset_name = task.asset_name.clone();

        let result = if task.is_scene() {
            self.publish_scene(&asset_name, asset, bundle, &task.dependency_assets, shared)
        } else {
            shared
                .cache
                .register_asset(&asset_name, asset, &task.dependency_assets, bundle)
                .map(|_| asset)
        };

        match result {
            Ok(asset) => {
                self.ticket = None;
                if let Some(name) = self.marked_asset.take() {
                    shared.loading_assets.remove(&name);
                }
                debug!("Agent {} loaded '{}' as {}", self.index, asset_name, asset);
                tasks.report_success(id, asset);
                self.state = AgentState::Done;
            }
            Err(err) => {
                error!("Agent {} can not register '{}': {}", self.index, asset_name, err);
                shared.resource_helper.release(ReleaseTarget::Asset(asset));
                self.fail(id, LoadResourceStatus::AssetError, &err.to_string(), tasks, shared);
            }
        }
    }

    // A scene that already has a record takes a claim on it instead.
    fn publish_scene(
        &self,
        scene_name: &str,
        asset: AssetHandle,
        bundle: BundleHandle,
        dependency_assets: &[AssetHandle],
        shared: &mut LoaderState,
    ) -> Result<AssetHandle, ResourceError> {
        let asset = match shared.cache.spawn_asset(scene_name) {
            Some(existing) => {
                if existing != asset {
                    shared.resource_helper.release(ReleaseTarget::Asset(asset));
                }
                shared.cache.unspawn_bundle(bundle)?;
                existing
            }
            None => {
                shared
                    .cache
                    .register_asset(scene_name, asset, dependency_assets, bundle)?;
                asset
            }
        };
        shared.cache.add_scene(scene_name, asset);
        Ok(asset)
    }

    /// Aborts the pipeline and reports the failure once.
    pub fn fail(
        &mut self,
        id: TaskId,
        status: LoadResourceStatus,
        message: &str,
        tasks: &mut TaskStore,
        shared: &mut LoaderState,
    ) {
        debug!("Agent {} fails {}: {} {}", self.index, id, status, message);
        self.abort(shared);

        if let Some(bundle) = tasks.get_mut(id).and_then(|task| task.bundle.take()) {
            if let Err(err) = shared.cache.unspawn_bundle(bundle) {
                warn!("Agent {} can not give back {}: {}", self.index, bundle, err);
            }
        }
        tasks.report_failure(id, status, message);
        self.state = AgentState::Done;
    }

    /// Resets the helper side and clears every in-flight marker of this agent.
    pub fn abort(&mut self, shared: &mut LoaderState) {
        if let Some(ticket) = self.ticket.take() {
            let _ = shared.sender.send(ToHelperMessage {
                ticket,
                request: HelperRequest::Reset,
            });
        }
        if let Some(name) = self.marked_asset.take() {
            shared.loading_assets.remove(&name);
        }
        if let Some(name) = self.marked_bundle.take() {
            shared.loading_bundles.remove(&name);
        }
    }
}
