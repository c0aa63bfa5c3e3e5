use crate::agent::{AgentState, LoadAgent, LoaderState, StartTaskStatus};
use crate::config::LoaderConfig;
use crate::descriptor::Catalog;
use crate::error::{LoadResourceStatus, ResourceError};
use crate::handle::{AssetHandle, BundleHandle};
use crate::helper::{
    DecryptContext, DecryptResourceCallback, FromHelperMessage, HelperBinding, ResourceHelper,
};
use crate::record::{ReleaseReport, ResidentCache};
use crate::task::{
    LoadAssetCallbacks, LoadAssetRequest, LoadSceneCallbacks, TaskId, TaskInfo, TaskKind,
    TaskSeed, TaskStore, UserData,
};
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};

/// Counters describing the loader at one point in time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoaderStats {
    pub total_agent_count: usize,
    pub free_agent_count: usize,
    pub working_agent_count: usize,
    pub waiting_task_count: usize,
    pub asset_count: usize,
    pub bundle_count: usize,
}

/// Collects the loader collaborators. Everything except the configuration
/// is mandatory.
#[derive(Default)]
pub struct ResourceLoaderBuilder {
    config: Option<LoaderConfig>,
    catalog: Option<Box<dyn Catalog>>,
    resource_helper: Option<Box<dyn ResourceHelper>>,
    decrypt: Option<DecryptResourceCallback>,
}

impl ResourceLoaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_catalog(mut self, catalog: impl Catalog + 'static) -> Self {
        self.catalog = Some(Box::new(catalog));
        self
    }

    pub fn with_resource_helper(mut self, helper: impl ResourceHelper + 'static) -> Self {
        self.resource_helper = Some(Box::new(helper));
        self
    }

    pub fn with_decrypt_callback(
        mut self,
        decrypt: impl FnMut(&mut [u8], &DecryptContext<'_>) + 'static,
    ) -> Self {
        self.decrypt = Some(Box::new(decrypt));
        self
    }

    pub fn build(self) -> Result<ResourceLoader, ResourceError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let catalog = self
            .catalog
            .ok_or_else(|| ResourceError::ConfigInvalid("Catalog is invalid.".to_string()))?;
        let resource_helper = self.resource_helper.ok_or_else(|| {
            ResourceError::ConfigInvalid("Resource helper is invalid.".to_string())
        })?;
        let decrypt = self.decrypt.ok_or_else(|| {
            ResourceError::ConfigInvalid("Decrypt resource callback is invalid.".to_string())
        })?;

        Ok(ResourceLoader::new(config, catalog, resource_helper, decrypt))
    }
}

/// Matches idle agents with pending load tasks and owns every piece of
/// loader state: both record pools, the reference count tables, the
/// in-flight name sets and the helper channel.
///
/// Nothing happens in the background. `update` must be called once per
/// frame to drain helper completions and hand waiting tasks to idle agents.
pub struct ResourceLoader {
    agents: Vec<LoadAgent>,
    // Used as a stack, the last freed agent is picked first.
    free_agents: Vec<usize>,
    working_agents: Vec<usize>,
    tasks: TaskStore,
    shared: LoaderState,
    catalog: Box<dyn Catalog>,
    receiver: Receiver<FromHelperMessage>,
    binding: HelperBinding,
    shut_down: bool,
}

impl ResourceLoader {
    fn new(
        config: LoaderConfig,
        catalog: Box<dyn Catalog>,
        resource_helper: Box<dyn ResourceHelper>,
        decrypt: DecryptResourceCallback,
    ) -> Self {
        let (binding, sender, receiver) = HelperBinding::new();
        let agents = (0..config.agent_count).map(LoadAgent::new).collect::<Vec<_>>();
        let free_agents = (0..config.agent_count).rev().collect();
        info!("Creating resource loader with {} agents", config.agent_count);

        ResourceLoader {
            agents,
            free_agents,
            working_agents: Vec::new(),
            tasks: TaskStore::new(),
            shared: LoaderState {
                config,
                cache: ResidentCache::new(),
                loading_assets: HashSet::new(),
                loading_bundles: HashSet::new(),
                cached_paths: HashMap::new(),
                sender,
                resource_helper,
                decrypt,
            },
            catalog,
            receiver,
            binding,
            shut_down: false,
        }
    }

    /// The helper side of the I/O channel. Hand it to whatever answers
    /// read, parse and instantiate requests.
    pub fn helper_binding(&self) -> HelperBinding {
        self.binding.clone()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    /// Queues an asset load. Failures detected here (unknown asset, broken
    /// dependency chain) are reported through the failure callback before
    /// returning, and `None` is returned.
    pub fn load_asset(
        &mut self,
        request: LoadAssetRequest,
        callbacks: LoadAssetCallbacks,
    ) -> Option<TaskId> {
        let LoadAssetRequest {
            asset_name,
            asset_type,
            priority,
            dependencies,
            user_data,
        } = request;
        self.submit(
            asset_name,
            asset_type,
            priority,
            dependencies,
            user_data,
            TaskKind::Asset(callbacks),
        )
    }

    /// Queues a scene load. Scenes never short-circuit through the cache.
    pub fn load_scene(
        &mut self,
        scene_name: &str,
        priority: i32,
        callbacks: LoadSceneCallbacks,
        user_data: UserData,
    ) -> Option<TaskId> {
        self.submit(
            scene_name.to_string(),
            None,
            priority,
            None,
            user_data,
            TaskKind::Scene(callbacks),
        )
    }

    fn fail_request(
        kind: &TaskKind,
        name: &str,
        status: LoadResourceStatus,
        message: &str,
        user_data: &UserData,
    ) {
        warn!("Load request for '{}' failed: {}", name, message);
        if let TaskKind::Asset(callbacks) | TaskKind::Scene(callbacks) = kind {
            callbacks.fail(name, status, message, user_data);
        }
    }

    fn submit(
        &mut self,
        asset_name: String,
        asset_type: Option<TypeId>,
        priority: i32,
        dependencies: Option<Vec<String>>,
        user_data: UserData,
        kind: TaskKind,
    ) -> Option<TaskId> {
        if self.shut_down {
            Self::fail_request(
                &kind,
                &asset_name,
                LoadResourceStatus::NotReady,
                "Resource loader is shut down.",
                &user_data,
            );
            return None;
        }

        let Some(info) = self.catalog.asset_info(&asset_name) else {
            let message = format!("Can not load asset '{}'.", asset_name);
            Self::fail_request(
                &kind,
                &asset_name,
                LoadResourceStatus::NotExist,
                &message,
                &user_data,
            );
            return None;
        };
        let dependency_names = dependencies.unwrap_or(info.dependency_asset_names);

        let main = self.tasks.create(TaskSeed {
            priority,
            asset_name: asset_name.clone(),
            asset_type,
            resource: info.resource,
            dependency_asset_names: dependency_names.clone(),
            user_data,
            kind,
        });

        let mut created = Vec::new();
        let mut stack = vec![asset_name.clone()];
        for dependency in &dependency_names {
            if let Err((status, message)) =
                self.create_dependency(dependency, priority, main, &mut stack, &mut created)
            {
                let message = format!(
                    "Can not load dependency asset '{}' when load asset '{}': {} ({}).",
                    dependency, asset_name, message, status
                );
                warn!("{}", message);
                for id in created {
                    self.tasks.finish(id);
                }
                self.tasks
                    .report_failure(main, LoadResourceStatus::DependencyError, &message);
                self.tasks.finish(main);
                return None;
            }
        }

        self.tasks.enqueue(main);
        for id in created {
            self.tasks.enqueue(id);
        }
        debug!(
            "Queued {} for '{}' with {} dependencies",
            main,
            asset_name,
            dependency_names.len()
        );
        Some(main)
    }

    fn create_dependency(
        &mut self,
        dependency_name: &str,
        priority: i32,
        main: TaskId,
        stack: &mut Vec<String>,
        created: &mut Vec<TaskId>,
    ) -> Result<(), (LoadResourceStatus, String)> {
        if stack.iter().any(|name| name == dependency_name) {
            return Err((
                LoadResourceStatus::DependencyError,
                format!("Circular dependency detected for asset '{}'", dependency_name),
            ));
        }
        let Some(info) = self.catalog.asset_info(dependency_name) else {
            return Err((
                LoadResourceStatus::NotExist,
                format!("Can not find asset '{}'", dependency_name),
            ));
        };

        let id = self.tasks.create(TaskSeed {
            priority,
            asset_name: dependency_name.to_string(),
            asset_type: None,
            resource: info.resource,
            dependency_asset_names: info.dependency_asset_names.clone(),
            user_data: None,
            kind: TaskKind::Dependency { main },
        });
        created.push(id);
        if let Some(task) = self.tasks.get_mut(main) {
            task.total_dependency_asset_count += 1;
        }

        stack.push(dependency_name.to_string());
        for nested in &info.dependency_asset_names {
            self.create_dependency(nested, priority, id, stack, created)?;
        }
        stack.pop();
        Ok(())
    }

    /// Gives back one claim on the asset and every dependency it holds.
    /// The records stay resident until a release pass evicts them.
    pub fn unload_asset(&mut self, asset: AssetHandle) -> Result<(), ResourceError> {
        self.shared.cache.unload_asset(asset)
    }

    /// Gives back one claim on the scene. The scene is forgotten once the
    /// last claim is gone.
    pub fn unload_scene(&mut self, scene_name: &str) -> Result<(), ResourceError> {
        let Some(asset) = self.shared.cache.scene(scene_name) else {
            return Err(ResourceError::Consistency(format!(
                "Scene '{}' is not loaded.",
                scene_name
            )));
        };
        self.shared.cache.unload_asset(asset)?;
        if self.shared.cache.asset_spawn_count(asset) == Some(0) {
            self.shared.cache.take_scene(scene_name);
        }
        Ok(())
    }

    /// Evicts one unclaimed asset record and gives back its bundle claim.
    pub fn release_asset(&mut self, asset: AssetHandle) -> Result<(), ResourceError> {
        let shared = &mut self.shared;
        shared.cache.release_asset(asset, shared.resource_helper.as_mut())
    }

    /// One eviction pass over everything nobody claims.
    pub fn release_unused(&mut self) -> Result<ReleaseReport, ResourceError> {
        let shared = &mut self.shared;
        shared.cache.release_unused(shared.resource_helper.as_mut())
    }

    /// Drains helper completions, recycles agents whose task is done and
    /// hands waiting tasks to free agents.
    pub fn update(&mut self) {
        while let Ok(message) = self.receiver.try_recv() {
            let index = message.ticket.agent();
            match self.agents.get_mut(index) {
                Some(agent) => agent.handle_event(message, &mut self.tasks, &mut self.shared),
                None => error!("{}", ResourceError::AgentNotFound(index)),
            }
        }

        let mut index = 0;
        while index < self.working_agents.len() {
            let agent_index = self.working_agents[index];
            let agent = &mut self.agents[agent_index];
            let done = agent.task().map(|id| self.tasks.is_done(id)).unwrap_or(true);
            if done {
                if let Some(id) = agent.task() {
                    self.tasks.finish(id);
                }
                agent.reset();
                self.working_agents.swap_remove(index);
                self.free_agents.push(agent_index);
            } else {
                index += 1;
            }
        }

        for id in self.tasks.waiting() {
            if self.tasks.is_done(id) {
                self.tasks.finish(id);
                continue;
            }
            let Some(agent_index) = self.free_agents.pop() else {
                break;
            };

            let agent = &mut self.agents[agent_index];
            match agent.start(id, &mut self.tasks, &mut self.shared) {
                StartTaskStatus::HasToWait => {
                    agent.reset();
                    self.free_agents.push(agent_index);
                }
                StartTaskStatus::Done => {
                    agent.reset();
                    self.tasks.finish(id);
                    self.free_agents.push(agent_index);
                }
                StartTaskStatus::CanResume => {
                    self.tasks.remove_waiting(id);
                    self.working_agents.push(agent_index);
                }
            }
        }

        self.give_back_orphaned_claims();
    }

    // Claims forwarded to, or held by, tasks that failed afterwards.
    fn give_back_orphaned_claims(&mut self) {
        for asset in self.tasks.take_orphaned_claims() {
            if let Err(err) = self.shared.cache.unload_asset(asset) {
                error!("Failed to give back claim on {}: {}", asset, err);
            }
        }
    }

    /// Aborts everything in flight, fails every pending request with
    /// `NotReady` and releases all resident records.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        info!("Shutting down resource loader");

        for agent in &mut self.agents {
            agent.abort(&mut self.shared);
            agent.reset();
        }
        self.working_agents.clear();
        self.free_agents = (0..self.agents.len()).rev().collect();

        self.tasks
            .fail_all(LoadResourceStatus::NotReady, "Resource loader is shutting down.");

        let shared = &mut self.shared;
        shared.cache.shutdown(shared.resource_helper.as_mut());
        shared.loading_assets.clear();
        shared.loading_bundles.clear();
        shared.cached_paths.clear();
        self.shut_down = true;
    }

    pub fn task_infos(&self) -> Vec<TaskInfo> {
        self.tasks.infos()
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            total_agent_count: self.agents.len(),
            free_agent_count: self.free_agents.len(),
            working_agent_count: self.working_agents.len(),
            waiting_task_count: self.tasks.waiting_count(),
            asset_count: self.shared.cache.asset_count(),
            bundle_count: self.shared.cache.bundle_count(),
        }
    }

    pub fn agent_states(&self) -> Vec<AgentState> {
        self.agents.iter().map(|agent| agent.state()).collect()
    }

    pub fn asset_handle(&self, asset_name: &str) -> Option<AssetHandle> {
        self.shared.cache.asset_handle(asset_name)
    }

    pub fn bundle_handle(&self, bundle_name: &str) -> Option<BundleHandle> {
        self.shared.cache.bundle_handle(bundle_name)
    }

    pub fn scene_handle(&self, scene_name: &str) -> Option<AssetHandle> {
        self.shared.cache.scene(scene_name)
    }

    pub fn asset_ref_count(&self, asset: AssetHandle) -> u32 {
        self.shared.cache.residency().asset_ref_count(asset)
    }

    pub fn bundle_ref_count(&self, bundle: BundleHandle) -> u32 {
        self.shared.cache.residency().bundle_ref_count(bundle)
    }

    pub fn asset_spawn_count(&self, asset: AssetHandle) -> Option<u32> {
        self.shared.cache.asset_spawn_count(asset)
    }

    pub fn bundle_spawn_count(&self, bundle: BundleHandle) -> Option<u32> {
        self.shared.cache.bundle_spawn_count(bundle)
    }

    pub fn is_asset_releasable(&self, asset: AssetHandle) -> bool {
        self.shared.cache.is_asset_releasable(asset)
    }

    pub fn is_bundle_releasable(&self, bundle: BundleHandle) -> bool {
        self.shared.cache.is_bundle_releasable(bundle)
    }

    /// Total and loaded dependency counts of a live task.
    pub fn dependency_progress(&self, id: TaskId) -> Result<(usize, usize), ResourceError> {
        let task = self.tasks.get(id).ok_or(ResourceError::TaskNotFound(id))?;
        Ok((
            task.total_dependency_asset_count,
            task.loaded_dependency_asset_count(),
        ))
    }
}

impl Drop for ResourceLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
