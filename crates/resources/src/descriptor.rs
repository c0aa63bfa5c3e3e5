use crate::error::ResourceError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Strategy used to bring a bundle into memory.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadType {
    FromFile,
    FromMemory,
    FromMemoryAndQuickDecrypt,
    FromMemoryAndDecrypt,
}

impl LoadType {
    pub fn from_tag(tag: u8) -> Result<LoadType, ResourceError> {
        match tag {
            0 => Ok(LoadType::FromFile),
            1 => Ok(LoadType::FromMemory),
            2 => Ok(LoadType::FromMemoryAndQuickDecrypt),
            3 => Ok(LoadType::FromMemoryAndDecrypt),
            other => Err(ResourceError::LoadTypeUnsupported(other)),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            LoadType::FromFile => 0,
            LoadType::FromMemory => 1,
            LoadType::FromMemoryAndQuickDecrypt => 2,
            LoadType::FromMemoryAndDecrypt => 3,
        }
    }

    pub fn needs_decrypt(&self) -> bool {
        matches!(
            self,
            LoadType::FromMemoryAndQuickDecrypt | LoadType::FromMemoryAndDecrypt
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    ReadOnly,
    ReadWrite,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName {
    pub name: String,
    pub variant: Option<String>,
    pub extension: String,
}

impl ResourceName {
    pub fn new(name: impl Into<String>, variant: Option<String>, extension: impl Into<String>) -> Self {
        ResourceName {
            name: name.into(),
            variant,
            extension: extension.into(),
        }
    }

    pub fn full_name(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}.{}.{}", self.name, variant, self.extension),
            None => format!("{}.{}", self.name, self.extension),
        }
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Where and how a bundle is stored. Owned by the catalog; the loader only
/// reads it. The readiness flag is the only part that may change after
/// construction (e.g. once an update has downloaded the bundle).
#[derive(Debug)]
pub struct ResourceDescriptor {
    name: ResourceName,
    storage: StorageArea,
    file_system: Option<String>,
    load_type: LoadType,
    length: u64,
    hash_code: u32,
    ready: AtomicBool,
}

impl ResourceDescriptor {
    pub fn new(name: ResourceName, load_type: LoadType) -> Self {
        ResourceDescriptor {
            name,
            storage: StorageArea::ReadOnly,
            file_system: None,
            load_type,
            length: 0,
            hash_code: 0,
            ready: AtomicBool::new(false),
        }
    }

    /// Builds a descriptor from a raw load type tag, as stored in manifests.
    pub fn from_tag(name: ResourceName, load_type_tag: u8) -> Result<Self, ResourceError> {
        Ok(Self::new(name, LoadType::from_tag(load_type_tag)?))
    }

    pub fn with_storage(mut self, storage: StorageArea) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_file_system(mut self, file_system: impl Into<String>) -> Self {
        self.file_system = Some(file_system.into());
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    pub fn with_hash_code(mut self, hash_code: u32) -> Self {
        self.hash_code = hash_code;
        self
    }

    pub fn ready(self) -> Self {
        self.mark_ready();
        self
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn storage(&self) -> StorageArea {
        self.storage
    }

    pub fn file_system(&self) -> Option<&str> {
        self.file_system.as_deref()
    }

    pub fn uses_file_system(&self) -> bool {
        self.file_system.is_some()
    }

    pub fn load_type(&self) -> LoadType {
        self.load_type
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn hash_code(&self) -> u32 {
        self.hash_code
    }
}

/// What the catalog knows about a single asset.
#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub resource: Arc<ResourceDescriptor>,
    pub dependency_asset_names: Vec<String>,
}

/// Resolves asset names to the bundle that holds them.
pub trait Catalog {
    fn asset_info(&self, asset_name: &str) -> Option<AssetInfo>;
}

/// Catalog backed by a plain map. Good enough for tools, demos and tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    assets: HashMap<String, AssetInfo>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        MemoryCatalog {
            assets: HashMap::new(),
        }
    }

    pub fn add_asset(
        &mut self,
        asset_name: impl Into<String>,
        resource: Arc<ResourceDescriptor>,
        dependency_asset_names: Vec<String>,
    ) {
        self.assets.insert(
            asset_name.into(),
            AssetInfo {
                resource,
                dependency_asset_names,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl Catalog for MemoryCatalog {
    fn asset_info(&self, asset_name: &str) -> Option<AssetInfo> {
        self.assets.get(asset_name).cloned()
    }
}
