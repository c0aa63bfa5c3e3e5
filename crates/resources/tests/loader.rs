use anyhow::anyhow;
use dawn_resources::{
    AssetHandle, BasicLoadHelper, BundleHandle, InstantiateRequest, LoadAssetCallbacks,
    LoadAssetRequest, LoadHelperHandler, LoadResourceStatus, LoadType, LoaderConfig,
    MemoryCatalog, OperationTicket, ReadTarget, ReleaseTarget, ResourceDescriptor, ResourceError,
    ResourceHelper, ResourceLoader, ResourceLoaderBuilder, ResourceName, StorageArea, TaskStatus,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

#[derive(Default)]
struct Script {
    file_reads: Vec<ReadTarget>,
    byte_reads: Vec<ReadTarget>,
    parsed: Vec<Vec<u8>>,
    loads: Vec<String>,
    resets: usize,
    failing: HashSet<String>,
    next_handle: u64,
}

struct ScriptedHandler {
    script: Rc<RefCell<Script>>,
}

impl ScriptedHandler {
    fn next_handle(&self) -> u64 {
        let mut script = self.script.borrow_mut();
        script.next_handle += 1;
        script.next_handle
    }
}

impl LoadHelperHandler for ScriptedHandler {
    fn read_file(&mut self, target: &ReadTarget) -> anyhow::Result<BundleHandle> {
        self.script.borrow_mut().file_reads.push(target.clone());
        Ok(BundleHandle::from_raw(self.next_handle()))
    }

    fn read_bytes(&mut self, target: &ReadTarget) -> anyhow::Result<Vec<u8>> {
        self.script.borrow_mut().byte_reads.push(target.clone());
        Ok(vec![1, 2, 3, 4])
    }

    fn parse_bytes(&mut self, bytes: Vec<u8>) -> anyhow::Result<BundleHandle> {
        self.script.borrow_mut().parsed.push(bytes);
        Ok(BundleHandle::from_raw(self.next_handle()))
    }

    fn load_asset(&mut self, request: &InstantiateRequest) -> anyhow::Result<AssetHandle> {
        if self.script.borrow().failing.contains(&request.asset_name) {
            return Err(anyhow!("'{}' is broken", request.asset_name));
        }
        self.script
            .borrow_mut()
            .loads
            .push(request.asset_name.clone());
        Ok(AssetHandle::from_raw(1000 + self.next_handle()))
    }

    fn reset(&mut self, _ticket: OperationTicket) {
        self.script.borrow_mut().resets += 1;
    }
}

struct RecordingRelease {
    released: Rc<RefCell<Vec<ReleaseTarget>>>,
}

impl ResourceHelper for RecordingRelease {
    fn release(&mut self, target: ReleaseTarget) {
        self.released.borrow_mut().push(target);
    }
}

struct Harness {
    loader: ResourceLoader,
    helper: BasicLoadHelper,
    handler: ScriptedHandler,
    script: Rc<RefCell<Script>>,
    released: Rc<RefCell<Vec<ReleaseTarget>>>,
    events: Rc<RefCell<Vec<String>>>,
    loaded: Rc<RefCell<HashMap<String, AssetHandle>>>,
    decrypted: Rc<RefCell<Vec<(String, u64, u32)>>>,
}

impl Harness {
    fn new(catalog: MemoryCatalog) -> Self {
        Self::with_config(catalog, LoaderConfig::default())
    }

    fn with_config(catalog: MemoryCatalog, config: LoaderConfig) -> Self {
        let released = Rc::new(RefCell::new(Vec::new()));
        let decrypted = Rc::new(RefCell::new(Vec::new()));
        let decrypt_log = decrypted.clone();
        let loader = ResourceLoaderBuilder::new()
            .with_config(config)
            .with_catalog(catalog)
            .with_resource_helper(RecordingRelease {
                released: released.clone(),
            })
            .with_decrypt_callback(move |bytes, context| {
                for byte in bytes.iter_mut() {
                    *byte ^= 0xFF;
                }
                decrypt_log.borrow_mut().push((
                    context.name.to_string(),
                    context.total_length,
                    context.hash_code,
                ));
            })
            .build()
            .unwrap();

        let mut helper = BasicLoadHelper::new();
        helper.bind(loader.helper_binding());
        let script = Rc::new(RefCell::new(Script::default()));

        Harness {
            loader,
            helper,
            handler: ScriptedHandler {
                script: script.clone(),
            },
            script,
            released,
            events: Rc::new(RefCell::new(Vec::new())),
            loaded: Rc::new(RefCell::new(HashMap::new())),
            decrypted,
        }
    }

    fn pump(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.loader.update();
            self.helper.process_pending(&mut self.handler);
        }
        self.loader.update();
    }

    fn callbacks(&self) -> LoadAssetCallbacks {
        let success_events = self.events.clone();
        let failure_events = self.events.clone();
        let dependency_events = self.events.clone();
        let loaded = self.loaded.clone();
        LoadAssetCallbacks::new(move |name, asset, _, _| {
            success_events.borrow_mut().push(format!("ok {}", name));
            loaded.borrow_mut().insert(name.to_string(), asset);
        })
        .with_failure(move |name, status, _, _| {
            failure_events
                .borrow_mut()
                .push(format!("fail {} {}", name, status));
        })
        .with_dependency(move |name, dependency, loaded, total, _| {
            dependency_events
                .borrow_mut()
                .push(format!("dep {} {} {}/{}", name, dependency, loaded, total));
        })
    }

    fn load(&mut self, name: &str) -> Option<dawn_resources::TaskId> {
        let callbacks = self.callbacks();
        self.loader.load_asset(LoadAssetRequest::new(name), callbacks)
    }

    fn handle(&self, name: &str) -> AssetHandle {
        self.loaded.borrow()[name]
    }

    fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

fn bundle(name: &str) -> Arc<ResourceDescriptor> {
    Arc::new(ResourceDescriptor::new(ResourceName::new(name, None, "dat"), LoadType::FromFile).ready())
}

#[test]
fn same_asset_requested_twice_loads_once() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("Hero", bundle("hero"), vec![]);
    let mut harness = Harness::new(catalog);

    harness.load("Hero");
    harness.load("Hero");
    harness.pump(6);

    assert_eq!(harness.events(), vec!["ok Hero", "ok Hero"]);
    let script = harness.script.borrow();
    assert_eq!(script.file_reads.len(), 1);
    assert_eq!(script.loads, vec!["Hero"]);
    assert_eq!(harness.loader.asset_spawn_count(harness.handle("Hero")), Some(2));
}

#[test]
fn dependency_chain_is_claimed_and_released_lazily() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("A", bundle("a"), vec!["B".to_string()]);
    catalog.add_asset("B", bundle("b"), vec![]);
    let mut harness = Harness::new(catalog);

    harness.load("A");
    harness.pump(10);

    assert_eq!(harness.events(), vec!["dep A B 1/1", "ok A"]);
    assert_eq!(harness.script.borrow().loads, vec!["B", "A"]);

    let a = harness.handle("A");
    let b = harness.loader.asset_handle("B").unwrap();
    let bundle_b = harness.loader.bundle_handle("b.dat").unwrap();
    assert_eq!(harness.loader.asset_ref_count(b), 1);
    assert_eq!(harness.loader.bundle_ref_count(bundle_b), 1);

    harness.loader.unload_asset(a).unwrap();
    assert!(harness.loader.is_asset_releasable(a));
    assert!(!harness.loader.is_asset_releasable(b));

    let first = harness.loader.release_unused().unwrap();
    assert_eq!(first.assets, vec![a]);
    assert_eq!(harness.loader.asset_ref_count(b), 0);
    assert!(harness.loader.asset_handle("B").is_some());

    let second = harness.loader.release_unused().unwrap();
    assert_eq!(second.assets, vec![b]);
    harness.loader.release_unused().unwrap();

    assert_eq!(harness.loader.stats().asset_count, 0);
    assert_eq!(harness.loader.stats().bundle_count, 0);
    assert_eq!(harness.released.borrow().len(), 4);
}

#[test]
fn claimed_asset_can_not_be_released() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("A", bundle("a"), vec!["B".to_string()]);
    catalog.add_asset("B", bundle("b"), vec![]);
    let mut harness = Harness::new(catalog);

    harness.load("A");
    harness.pump(10);
    let a = harness.handle("A");
    let b = harness.loader.asset_handle("B").unwrap();
    harness.loader.unload_asset(a).unwrap();

    let err = harness.loader.release_asset(b).unwrap_err();
    assert!(matches!(err, ResourceError::Consistency(_)));
    assert_eq!(harness.loader.asset_ref_count(b), 1);
    assert_eq!(harness.loader.asset_handle("B"), Some(b));
    assert!(harness.released.borrow().is_empty());
}

#[test]
fn dependency_counters_track_creation_and_completion() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("A", bundle("a"), vec!["B".to_string(), "C".to_string()]);
    catalog.add_asset("B", bundle("b"), vec![]);
    catalog.add_asset("C", bundle("c"), vec![]);
    let mut harness = Harness::new(catalog);

    let main = harness.load("A").unwrap();
    assert_eq!(harness.loader.dependency_progress(main), Ok((2, 0)));

    harness.pump(10);

    let loaded_counts = harness
        .events()
        .iter()
        .filter(|event| event.starts_with("dep A"))
        .map(|event| event.rsplit(' ').next().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(loaded_counts, vec!["1/2", "2/2"]);
    assert_eq!(harness.events().last().map(String::as_str), Some("ok A"));
    assert_eq!(
        harness.loader.dependency_progress(main),
        Err(ResourceError::TaskNotFound(main))
    );
}

#[test]
fn failing_dependency_fails_main_once() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("A", bundle("a"), vec!["B".to_string()]);
    catalog.add_asset("B", bundle("b"), vec![]);
    let mut harness = Harness::new(catalog);
    harness.script.borrow_mut().failing.insert("B".to_string());

    harness.load("A");
    harness.pump(10);

    assert_eq!(harness.events(), vec!["fail A DependencyError"]);
    assert!(harness.script.borrow().loads.is_empty());
    assert_eq!(harness.script.borrow().resets, 1);
    assert!(harness.loader.task_infos().is_empty());

    // The bundle stays resident without claims and goes on the next pass.
    let report = harness.loader.release_unused().unwrap();
    assert_eq!(report.bundles.len(), 1);
}

#[test]
fn failed_main_gives_back_sibling_claims() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("A", bundle("a"), vec!["B".to_string(), "C".to_string()]);
    catalog.add_asset("B", bundle("b"), vec![]);
    catalog.add_asset("C", bundle("c"), vec![]);
    let mut harness = Harness::new(catalog);
    harness.script.borrow_mut().failing.insert("C".to_string());

    harness.load("A");
    harness.pump(10);

    assert_eq!(harness.events(), vec!["dep A B 1/2", "fail A DependencyError"]);
    let b = harness.loader.asset_handle("B").unwrap();
    assert_eq!(harness.loader.asset_spawn_count(b), Some(0));
    assert!(harness.loader.is_asset_releasable(b));

    for _ in 0..4 {
        harness.loader.release_unused().unwrap();
    }
    let stats = harness.loader.stats();
    assert_eq!(stats.asset_count, 0);
    assert_eq!(stats.bundle_count, 0);
}

#[test]
fn unknown_asset_fails_synchronously() {
    let mut harness = Harness::new(MemoryCatalog::new());

    assert!(harness.load("Missing").is_none());
    assert_eq!(harness.events(), vec!["fail Missing NotExist"]);
}

#[test]
fn circular_declared_dependencies_are_rejected() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("A", bundle("a"), vec!["B".to_string()]);
    catalog.add_asset("B", bundle("b"), vec!["A".to_string()]);
    let mut harness = Harness::new(catalog);

    assert!(harness.load("A").is_none());
    assert_eq!(harness.events(), vec!["fail A DependencyError"]);
    assert!(harness.loader.task_infos().is_empty());
}

#[test]
fn explicit_dependencies_override_the_catalog() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("A", bundle("a"), vec!["B".to_string()]);
    catalog.add_asset("B", bundle("b"), vec![]);
    let mut harness = Harness::new(catalog);

    let callbacks = harness.callbacks();
    harness
        .loader
        .load_asset(LoadAssetRequest::new("A").with_dependencies(vec![]), callbacks);
    harness.pump(6);

    assert_eq!(harness.events(), vec!["ok A"]);
    assert_eq!(harness.script.borrow().loads, vec!["A"]);
}

#[test]
fn encrypted_bundles_are_decrypted_before_parsing() {
    let secret = Arc::new(
        ResourceDescriptor::new(
            ResourceName::new("secret", None, "dat"),
            LoadType::FromMemoryAndDecrypt,
        )
        .with_length(4)
        .with_hash_code(0xCAFE)
        .ready(),
    );
    let plain = Arc::new(
        ResourceDescriptor::new(ResourceName::new("plain", None, "dat"), LoadType::FromMemory)
            .ready(),
    );
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("Secret", secret, vec![]);
    catalog.add_asset("Plain", plain, vec![]);
    let mut harness = Harness::new(catalog);

    harness.load("Secret");
    harness.load("Plain");
    harness.pump(8);

    assert_eq!(harness.events(), vec!["ok Secret", "ok Plain"]);
    assert_eq!(
        *harness.decrypted.borrow(),
        vec![("secret".to_string(), 4, 0xCAFE)]
    );
    let script = harness.script.borrow();
    assert_eq!(script.byte_reads.len(), 2);
    assert!(script.file_reads.is_empty());
    assert_eq!(script.parsed[0], vec![0xFE, 0xFD, 0xFC, 0xFB]);
    assert_eq!(script.parsed[1], vec![1, 2, 3, 4]);
}

#[test]
fn read_targets_use_storage_paths() {
    let packed = Arc::new(
        ResourceDescriptor::new(ResourceName::new("ui", None, "dat"), LoadType::FromFile)
            .with_storage(StorageArea::ReadWrite)
            .with_file_system("packs\\main.fs")
            .ready(),
    );
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("Hero", bundle("hero"), vec![]);
    catalog.add_asset("Button", packed, vec![]);
    let config = LoaderConfig {
        agent_count: 2,
        read_only_path: "data".to_string(),
        read_write_path: "C:\\cache".to_string(),
    };
    let mut harness = Harness::with_config(catalog, config);

    harness.load("Hero");
    harness.load("Button");
    harness.pump(6);

    assert_eq!(
        harness.script.borrow().file_reads,
        vec![
            ReadTarget::Path("data/hero.dat".to_string()),
            ReadTarget::FileSystem {
                file_system: "C:/cache/packs/main.fs".to_string(),
                storage: StorageArea::ReadWrite,
                entry: "ui.dat".to_string(),
            },
        ]
    );
}

#[test]
fn shared_file_system_name_keeps_storage_areas_apart() {
    let ui = Arc::new(
        ResourceDescriptor::new(ResourceName::new("ui", None, "dat"), LoadType::FromFile)
            .with_storage(StorageArea::ReadOnly)
            .with_file_system("shared.fs")
            .ready(),
    );
    let patch = Arc::new(
        ResourceDescriptor::new(ResourceName::new("patch", None, "dat"), LoadType::FromFile)
            .with_storage(StorageArea::ReadWrite)
            .with_file_system("shared.fs")
            .ready(),
    );
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("Ui", ui, vec![]);
    catalog.add_asset("Patch", patch, vec![]);
    let config = LoaderConfig {
        agent_count: 2,
        read_only_path: "ro".to_string(),
        read_write_path: "rw".to_string(),
    };
    let mut harness = Harness::with_config(catalog, config);

    harness.load("Ui");
    harness.load("Patch");
    harness.pump(6);

    assert_eq!(
        harness.script.borrow().file_reads,
        vec![
            ReadTarget::FileSystem {
                file_system: "ro/shared.fs".to_string(),
                storage: StorageArea::ReadOnly,
                entry: "ui.dat".to_string(),
            },
            ReadTarget::FileSystem {
                file_system: "rw/shared.fs".to_string(),
                storage: StorageArea::ReadWrite,
                entry: "patch.dat".to_string(),
            },
        ]
    );
}

#[test]
fn tasks_wait_for_resource_readiness() {
    let pending = Arc::new(ResourceDescriptor::new(
        ResourceName::new("late", None, "dat"),
        LoadType::FromFile,
    ));
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("Late", pending.clone(), vec![]);
    let mut harness = Harness::new(catalog);

    harness.load("Late");
    harness.pump(4);
    assert!(harness.events().is_empty());
    assert!(harness.script.borrow().file_reads.is_empty());
    assert_eq!(harness.loader.task_infos()[0].status, TaskStatus::Todo);

    pending.mark_ready();
    harness.pump(4);
    assert_eq!(harness.events(), vec!["ok Late"]);
}

#[test]
fn higher_priority_runs_first() {
    let mut catalog = MemoryCatalog::new();
    for name in ["X", "Y", "Z"] {
        catalog.add_asset(name, bundle(&name.to_lowercase()), vec![]);
    }
    let config = LoaderConfig {
        agent_count: 1,
        ..LoaderConfig::default()
    };
    let mut harness = Harness::with_config(catalog, config);

    for (name, priority) in [("X", 0), ("Y", 0), ("Z", 10)] {
        let callbacks = harness.callbacks();
        harness.loader.load_asset(
            LoadAssetRequest::new(name).with_priority(priority),
            callbacks,
        );
    }
    harness.pump(12);

    assert_eq!(harness.script.borrow().loads, vec!["Z", "X", "Y"]);
    assert_eq!(harness.events(), vec!["ok Z", "ok X", "ok Y"]);
}

#[test]
fn scenes_bypass_the_cache() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("Level", bundle("level"), vec![]);
    let mut harness = Harness::new(catalog);

    for _ in 0..2 {
        let callbacks = harness.callbacks();
        harness.loader.load_scene("Level", 0, callbacks, None);
        harness.pump(6);
    }

    assert_eq!(harness.events(), vec!["ok Level", "ok Level"]);
    assert_eq!(harness.script.borrow().loads, vec!["Level", "Level"]);
    assert_eq!(harness.script.borrow().file_reads.len(), 1);

    let scene = harness.loader.scene_handle("Level").unwrap();
    assert_eq!(harness.loader.asset_spawn_count(scene), Some(2));
    assert_eq!(harness.released.borrow().len(), 1);

    harness.loader.unload_scene("Level").unwrap();
    harness.loader.unload_scene("Level").unwrap();
    assert!(harness.loader.scene_handle("Level").is_none());
    assert!(matches!(
        harness.loader.unload_scene("Level"),
        Err(ResourceError::Consistency(_))
    ));
}

#[test]
fn shutdown_fails_pending_requests_and_releases_records() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("Hero", bundle("hero"), vec![]);
    catalog.add_asset("Slow", bundle("slow"), vec![]);
    let mut harness = Harness::new(catalog);

    harness.load("Hero");
    harness.pump(6);
    harness.load("Slow");
    harness.loader.update();

    harness.loader.shutdown();
    harness.helper.process_pending(&mut harness.handler);

    assert_eq!(harness.events(), vec!["ok Hero", "fail Slow NotReady"]);
    assert_eq!(harness.script.borrow().resets, 1);
    assert_eq!(harness.released.borrow().len(), 2);
    assert_eq!(harness.loader.stats().asset_count, 0);

    assert!(harness.load("Hero").is_none());
    assert_eq!(harness.events().last().map(String::as_str), Some("fail Hero NotReady"));
}

#[test]
fn builder_rejects_missing_collaborators() {
    let result = ResourceLoaderBuilder::new()
        .with_catalog(MemoryCatalog::new())
        .build();
    assert!(matches!(result, Err(ResourceError::ConfigInvalid(_))));

    let result = ResourceLoaderBuilder::new()
        .with_config(LoaderConfig {
            agent_count: 0,
            ..LoaderConfig::default()
        })
        .build();
    assert!(matches!(result, Err(ResourceError::ConfigInvalid(_))));
}

#[test]
fn stale_completions_are_ignored() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("Hero", bundle("hero"), vec![]);
    let mut harness = Harness::new(catalog);
    let binding = harness.loader.helper_binding();

    harness.load("Hero");
    harness.loader.update();
    let request = binding.try_recv().unwrap();
    binding.complete(
        request.ticket,
        dawn_resources::HelperEvent::Error(LoadResourceStatus::NotExist, "gone".to_string()),
    );
    binding.complete(
        request.ticket,
        dawn_resources::HelperEvent::ReadFileComplete(BundleHandle::from_raw(7)),
    );
    harness.pump(4);

    assert_eq!(harness.events(), vec!["fail Hero NotExist"]);
    assert_eq!(harness.loader.stats().bundle_count, 0);
}
