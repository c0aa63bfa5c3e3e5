use anyhow::{anyhow, Context};
use common::logging::CommonLogger;
use dawn_resources::{
    AssetHandle, BasicLoadHelper, BundleHandle, InstantiateRequest, LoadAssetCallbacks,
    LoadAssetRequest, LoadHelperHandler, LoadType, LoaderConfig, MemoryCatalog, ReadTarget,
    ReleaseTarget, ResourceDescriptor, ResourceHelper, ResourceLoaderBuilder, ResourceName,
};
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use web_time::{Duration, Instant};

const CONFIG: &str = r#"
agent_count = 2
read_only_path = "packages"
read_write_path = "cache"
"#;

// Pretends to be the engine: bundles are byte blobs in memory.
struct InMemoryEngine {
    files: HashMap<String, Vec<u8>>,
    bundles: HashMap<BundleHandle, String>,
    next_handle: u64,
}

impl InMemoryEngine {
    fn new() -> Self {
        let mut files = HashMap::new();
        files.insert("packages/characters.dat".to_string(), b"hero,villain".to_vec());
        files.insert("packages/materials.dat".to_string(), b"skin,cloth".to_vec());
        // "Encrypted" with a single byte xor.
        files.insert(
            "packages/secret.dat".to_string(),
            b"map".iter().map(|byte| byte ^ 0x5A).collect(),
        );
        InMemoryEngine {
            files,
            bundles: HashMap::new(),
            next_handle: 0,
        }
    }

    fn allocate(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn path(target: &ReadTarget) -> String {
        match target {
            ReadTarget::Path(path) => path.clone(),
            ReadTarget::FileSystem {
                file_system, entry, ..
            } => format!("{}/{}", file_system, entry),
        }
    }
}

impl LoadHelperHandler for InMemoryEngine {
    fn read_file(&mut self, target: &ReadTarget) -> anyhow::Result<BundleHandle> {
        let path = Self::path(target);
        let content = self
            .files
            .get(&path)
            .ok_or_else(|| anyhow!("No such file: {}", path))?;
        let content = String::from_utf8_lossy(content).to_string();
        let handle = BundleHandle::from_raw(self.allocate());
        self.bundles.insert(handle, content);
        Ok(handle)
    }

    fn read_bytes(&mut self, target: &ReadTarget) -> anyhow::Result<Vec<u8>> {
        let path = Self::path(target);
        self.files
            .get(&path)
            .cloned()
            .ok_or_else(|| anyhow!("No such file: {}", path))
    }

    fn parse_bytes(&mut self, bytes: Vec<u8>) -> anyhow::Result<BundleHandle> {
        let content = String::from_utf8(bytes).context("Bundle is not valid UTF-8")?;
        let handle = BundleHandle::from_raw(self.allocate());
        self.bundles.insert(handle, content);
        Ok(handle)
    }

    fn load_asset(&mut self, request: &InstantiateRequest) -> anyhow::Result<AssetHandle> {
        let content = self
            .bundles
            .get(&request.bundle)
            .ok_or_else(|| anyhow!("Unknown bundle {}", request.bundle))?;
        let entry = request.asset_name.to_lowercase();
        if !content.split(',').any(|name| name == entry) {
            return Err(anyhow!("'{}' is not in {}", request.asset_name, request.bundle));
        }
        Ok(AssetHandle::from_raw(self.allocate()))
    }
}

struct LoggingRelease;

impl ResourceHelper for LoggingRelease {
    fn release(&mut self, target: ReleaseTarget) {
        log::info!("Engine releases {:?}", target);
    }
}

fn catalog() -> MemoryCatalog {
    let characters = Arc::new(
        ResourceDescriptor::new(ResourceName::new("characters", None, "dat"), LoadType::FromFile)
            .ready(),
    );
    let materials = Arc::new(
        ResourceDescriptor::new(ResourceName::new("materials", None, "dat"), LoadType::FromMemory)
            .ready(),
    );
    let secret = Arc::new(
        ResourceDescriptor::new(
            ResourceName::new("secret", None, "dat"),
            LoadType::FromMemoryAndQuickDecrypt,
        )
        .with_length(3)
        .ready(),
    );

    let mut catalog = MemoryCatalog::new();
    catalog.add_asset("Hero", characters.clone(), vec!["Skin".to_string(), "Cloth".to_string()]);
    catalog.add_asset("Villain", characters, vec!["Skin".to_string()]);
    catalog.add_asset("Skin", materials.clone(), vec![]);
    catalog.add_asset("Cloth", materials, vec![]);
    catalog.add_asset("Map", secret, vec![]);
    catalog
}

fn main() -> anyhow::Result<()> {
    CommonLogger::init(log::LevelFilter::Info);

    let config = LoaderConfig::from_toml_str(CONFIG)?;
    let mut loader = ResourceLoaderBuilder::new()
        .with_config(config)
        .with_catalog(catalog())
        .with_resource_helper(LoggingRelease)
        .with_decrypt_callback(|bytes, context| {
            log::info!("Decrypting {} bytes of '{}'", context.length, context.name);
            for byte in bytes.iter_mut() {
                *byte ^= 0x5A;
            }
        })
        .build()?;

    let stop = Arc::new(AtomicBool::new(false));
    let binding = loader.helper_binding();
    let helper_stop = stop.clone();
    let helper_thread = std::thread::Builder::new()
        .name("load-helper".to_string())
        .spawn(move || {
            let mut helper = BasicLoadHelper::new();
            helper.bind(binding);
            let mut engine = InMemoryEngine::new();
            while !helper_stop.load(Ordering::SeqCst) {
                helper.process_events(&mut engine, Duration::from_millis(10));
            }
        })?;

    let pending = Rc::new(Cell::new(0usize));
    let loaded = Rc::new(std::cell::RefCell::new(Vec::new()));
    for name in ["Hero", "Villain", "Map", "Hero"] {
        let done = pending.clone();
        let failed = pending.clone();
        let handles = loaded.clone();
        let callbacks = LoadAssetCallbacks::new(move |name, asset, elapsed, _| {
            log::info!("Loaded '{}' as {} in {:.3}s", name, asset, elapsed);
            handles.borrow_mut().push(asset);
            done.set(done.get() - 1);
        })
        .with_failure(move |name, status, message, _| {
            log::error!("Failed to load '{}' ({}): {}", name, status, message);
            failed.set(failed.get() - 1);
        })
        .with_dependency(|name, dependency, loaded, total, _| {
            log::info!("'{}' dependency '{}' ready ({}/{})", name, dependency, loaded, total);
        });

        if loader
            .load_asset(LoadAssetRequest::new(name), callbacks)
            .is_some()
        {
            pending.set(pending.get() + 1);
        }
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while pending.get() > 0 && Instant::now() < deadline {
        loader.update();
        std::thread::sleep(Duration::from_millis(1));
    }
    log::info!("Loader stats: {:?}", loader.stats());

    for asset in loaded.borrow().iter() {
        loader.unload_asset(*asset)?;
    }
    loop {
        let report = loader.release_unused()?;
        if report.assets.is_empty() && report.bundles.is_empty() {
            break;
        }
    }
    log::info!("After release: {:?}", loader.stats());

    loader.shutdown();
    stop.store(true, Ordering::SeqCst);
    helper_thread
        .join()
        .map_err(|_| anyhow!("Load helper thread panicked"))?;
    Ok(())
}
