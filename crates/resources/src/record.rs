use crate::error::ResourceError;
use crate::handle::{AssetHandle, BundleHandle, ReleaseTarget};
use crate::helper::ResourceHelper;
use crate::pool::{ObjectPool, PooledRecord, Recyclable};
use log::{debug, info};
use std::collections::HashMap;
use std::hash::Hash;

/// Reference count tables shared by both record kinds.
/// A count is the number of resident records that claimed the handle as a
/// dependency; it never goes below zero.
#[derive(Debug, Default)]
pub(crate) struct Residency {
    asset_dependency_count: HashMap<AssetHandle, u32>,
    bundle_dependency_count: HashMap<BundleHandle, u32>,
    asset_to_bundle: HashMap<AssetHandle, BundleHandle>,
}

impl Residency {
    pub fn asset_ref_count(&self, asset: AssetHandle) -> u32 {
        self.asset_dependency_count.get(&asset).copied().unwrap_or(0)
    }

    pub fn bundle_ref_count(&self, bundle: BundleHandle) -> u32 {
        self.bundle_dependency_count.get(&bundle).copied().unwrap_or(0)
    }

    pub fn bundle_of(&self, asset: AssetHandle) -> Option<BundleHandle> {
        self.asset_to_bundle.get(&asset).copied()
    }
}

fn count_claims<T: Copy + Eq + Hash>(handles: &[T]) -> HashMap<T, u32> {
    let mut claims = HashMap::new();
    for handle in handles {
        *claims.entry(*handle).or_insert(0) += 1;
    }
    claims
}

fn check_claims<T: Copy + Eq + Hash>(
    counts: &HashMap<T, u32>,
    handles: &[T],
    owner: &str,
    kind: &str,
) -> Result<(), ResourceError> {
    for (handle, needed) in count_claims(handles) {
        match counts.get(&handle) {
            Some(count) if *count >= needed => {}
            _ => {
                return Err(ResourceError::Consistency(format!(
                    "{} target '{}' dependency reference count is invalid.",
                    kind, owner
                )))
            }
        }
    }
    Ok(())
}

fn drop_claim<T: Copy + Eq + Hash>(counts: &mut HashMap<T, u32>, handle: T) -> bool {
    match counts.get_mut(&handle) {
        Some(count) if *count > 0 => {
            *count -= 1;
            true
        }
        _ => false,
    }
}

/// One resident asset: its engine handle, the bundle it came from and the
/// dependency assets it claimed when it was created.
#[derive(Debug, Default)]
pub(crate) struct AssetRecord {
    name: String,
    target: AssetHandle,
    dependency_assets: Vec<AssetHandle>,
    bundle: BundleHandle,
}

impl Recyclable for AssetRecord {
    fn clear(&mut self) {
        self.name.clear();
        self.target = AssetHandle::default();
        self.dependency_assets.clear();
        self.bundle = BundleHandle::default();
    }
}

impl PooledRecord for AssetRecord {
    type Target = AssetHandle;

    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> AssetHandle {
        self.target
    }
}

impl AssetRecord {
    /// Fills a recycled slot and claims every dependency exactly once.
    pub fn initialize(
        &mut self,
        name: &str,
        target: AssetHandle,
        dependency_assets: &[AssetHandle],
        bundle: BundleHandle,
        residency: &mut Residency,
    ) -> Result<(), ResourceError> {
        if name.is_empty() {
            return Err(ResourceError::ConfigInvalid("Asset name is invalid.".to_string()));
        }
        if dependency_assets.contains(&target) {
            return Err(ResourceError::ConfigInvalid(format!(
                "Asset '{}' can not depend on itself.",
                name
            )));
        }

        self.name.push_str(name);
        self.target = target;
        self.dependency_assets.extend_from_slice(dependency_assets);
        self.bundle = bundle;

        for dependency in dependency_assets {
            let count = residency
                .asset_dependency_count
                .entry(*dependency)
                .or_insert(0);
            *count += 1;
            debug!("Asset {} claimed by '{}', count {}", dependency, name, count);
        }
        Ok(())
    }

    pub fn dependency_assets(&self) -> &[AssetHandle] {
        &self.dependency_assets
    }

    pub fn bundle(&self) -> BundleHandle {
        self.bundle
    }

    pub fn custom_can_release(&self, residency: &Residency) -> bool {
        residency.asset_ref_count(self.target) == 0
    }

    pub fn validate_release(&self, residency: &Residency) -> Result<(), ResourceError> {
        let count = residency.asset_ref_count(self.target);
        if count > 0 {
            return Err(ResourceError::Consistency(format!(
                "Asset target '{}' reference count is '{}' larger than 0.",
                self.name, count
            )));
        }
        check_claims(
            &residency.asset_dependency_count,
            &self.dependency_assets,
            &self.name,
            "Asset",
        )
    }

    /// Gives back the claims and unloads the handle.
    /// A shutdown release skips the claim bookkeeping, the whole cache goes away.
    pub fn release(
        &self,
        is_shutdown: bool,
        residency: &mut Residency,
        helper: &mut dyn ResourceHelper,
    ) -> Result<(), ResourceError> {
        debug!("Releasing asset '{}' ({})", self.name, self.target);
        if !is_shutdown {
            self.validate_release(residency)?;
            for dependency in &self.dependency_assets {
                if !drop_claim(&mut residency.asset_dependency_count, *dependency) {
                    return Err(ResourceError::Consistency(format!(
                        "Asset target '{}' dependency reference count is invalid.",
                        self.name
                    )));
                }
            }
        }

        residency.asset_dependency_count.remove(&self.target);
        residency.asset_to_bundle.remove(&self.target);
        helper.release(ReleaseTarget::Asset(self.target));
        Ok(())
    }
}

/// One resident bundle and the other bundles it keeps alive.
#[derive(Debug, Default)]
pub(crate) struct BundleRecord {
    name: String,
    target: BundleHandle,
    dependency_bundles: Vec<BundleHandle>,
}

impl Recyclable for BundleRecord {
    fn clear(&mut self) {
        self.name.clear();
        self.target = BundleHandle::default();
        self.dependency_bundles.clear();
    }
}

impl PooledRecord for BundleRecord {
    type Target = BundleHandle;

    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> BundleHandle {
        self.target
    }
}

impl BundleRecord {
    pub fn initialize(&mut self, name: &str, target: BundleHandle) -> Result<(), ResourceError> {
        if name.is_empty() {
            return Err(ResourceError::ConfigInvalid("Bundle name is invalid.".to_string()));
        }

        self.name.push_str(name);
        self.target = target;
        Ok(())
    }

    /// Claims `dependency` once. Repeated and self claims are no-ops.
    pub fn add_dependency_resource(&mut self, dependency: BundleHandle, residency: &mut Residency) {
        if dependency == self.target || self.dependency_bundles.contains(&dependency) {
            return;
        }

        self.dependency_bundles.push(dependency);
        let count = residency
            .bundle_dependency_count
            .entry(dependency)
            .or_insert(0);
        *count += 1;
        debug!("Bundle {} claimed by '{}', count {}", dependency, self.name, count);
    }

    pub fn dependency_bundles(&self) -> &[BundleHandle] {
        &self.dependency_bundles
    }

    pub fn custom_can_release(&self, residency: &Residency) -> bool {
        residency.bundle_ref_count(self.target) == 0
    }

    pub fn validate_release(&self, residency: &Residency) -> Result<(), ResourceError> {
        let count = residency.bundle_ref_count(self.target);
        if count > 0 {
            return Err(ResourceError::Consistency(format!(
                "Bundle target '{}' reference count is '{}' larger than 0.",
                self.name, count
            )));
        }
        check_claims(
            &residency.bundle_dependency_count,
            &self.dependency_bundles,
            &self.name,
            "Bundle",
        )
    }

    pub fn release(
        &self,
        is_shutdown: bool,
        residency: &mut Residency,
        helper: &mut dyn ResourceHelper,
    ) -> Result<(), ResourceError> {
        debug!("Releasing bundle '{}' ({})", self.name, self.target);
        if !is_shutdown {
            self.validate_release(residency)?;
            for dependency in &self.dependency_bundles {
                // Zero is left in place, the dependency waits for its own release pass.
                if !drop_claim(&mut residency.bundle_dependency_count, *dependency) {
                    return Err(ResourceError::Consistency(format!(
                        "Bundle target '{}' dependency reference count is invalid.",
                        self.name
                    )));
                }
            }
        }

        residency.bundle_dependency_count.remove(&self.target);
        helper.release(ReleaseTarget::Bundle(self.target));
        Ok(())
    }
}

/// What a `release_unused` pass evicted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub assets: Vec<AssetHandle>,
    pub bundles: Vec<BundleHandle>,
}

/// Both record pools plus the tables tying them together.
pub(crate) struct ResidentCache {
    assets: ObjectPool<AssetRecord>,
    bundles: ObjectPool<BundleRecord>,
    residency: Residency,
    scenes: HashMap<String, AssetHandle>,
}

impl ResidentCache {
    pub fn new() -> Self {
        ResidentCache {
            assets: ObjectPool::new("Asset"),
            bundles: ObjectPool::new("Bundle"),
            residency: Residency::default(),
            scenes: HashMap::new(),
        }
    }

    pub fn residency(&self) -> &Residency {
        &self.residency
    }

    pub fn can_spawn_asset(&self, name: &str) -> bool {
        self.assets.can_spawn(name)
    }

    pub fn spawn_asset(&mut self, name: &str) -> Option<AssetHandle> {
        self.assets.spawn(name).map(|record| record.target())
    }

    pub fn spawn_bundle(&mut self, name: &str) -> Option<BundleHandle> {
        self.bundles.spawn(name).map(|record| record.target())
    }

    pub fn unspawn_bundle(&mut self, bundle: BundleHandle) -> Result<(), ResourceError> {
        self.bundles.unspawn(bundle)
    }

    /// Registers a freshly read bundle, already claimed by the caller.
    pub fn register_bundle(&mut self, name: &str, target: BundleHandle) -> Result<(), ResourceError> {
        if self.bundles.can_spawn(name) || self.bundles.contains(target) {
            return Err(ResourceError::Consistency(format!(
                "Bundle '{}' is already resident.",
                name
            )));
        }

        let mut record = self.bundles.acquire();
        if let Err(err) = record.initialize(name, target) {
            self.bundles.recycle(record);
            return Err(err);
        }
        self.bundles.register(record, true)
    }

    /// Registers a freshly instantiated asset, already claimed by the caller.
    /// The owning bundle additionally claims the bundles of every dependency.
    pub fn register_asset(
        &mut self,
        name: &str,
        target: AssetHandle,
        dependency_assets: &[AssetHandle],
        bundle: BundleHandle,
    ) -> Result<(), ResourceError> {
        if self.assets.can_spawn(name) || self.assets.contains(target) {
            return Err(ResourceError::Consistency(format!(
                "Asset '{}' is already resident.",
                name
            )));
        }
        if !self.bundles.contains(bundle) {
            return Err(ResourceError::Consistency(format!(
                "Bundle {} of asset '{}' is not resident.",
                bundle, name
            )));
        }
        let mut dependency_bundles = Vec::with_capacity(dependency_assets.len());
        for dependency in dependency_assets {
            match self.residency.bundle_of(*dependency) {
                Some(dependency_bundle) => dependency_bundles.push(dependency_bundle),
                None => {
                    return Err(ResourceError::Consistency(format!(
                        "Can not find dependency resource of asset {} for '{}'.",
                        dependency, name
                    )))
                }
            }
        }

        let mut record = self.assets.acquire();
        if let Err(err) =
            record.initialize(name, target, dependency_assets, bundle, &mut self.residency)
        {
            self.assets.recycle(record);
            return Err(err);
        }
        self.assets.register(record, true)?;
        self.residency.asset_to_bundle.insert(target, bundle);

        if let Some(owner) = self.bundles.get_mut(bundle) {
            for dependency_bundle in dependency_bundles {
                owner.add_dependency_resource(dependency_bundle, &mut self.residency);
            }
        }
        Ok(())
    }

    /// Gives back one claim on `target` and, transitively, on every
    /// dependency it holds. Nothing changes if any claim is missing.
    pub fn unload_asset(&mut self, target: AssetHandle) -> Result<(), ResourceError> {
        let mut needed: HashMap<AssetHandle, u32> = HashMap::new();
        let mut stack = vec![target];
        while let Some(handle) = stack.pop() {
            let record = self.assets.get(handle).ok_or_else(|| {
                ResourceError::Consistency(format!("Asset {} is not resident.", handle))
            })?;
            *needed.entry(handle).or_insert(0) += 1;
            stack.extend_from_slice(record.dependency_assets());
        }

        for (handle, count) in &needed {
            let spawned = self.assets.spawn_count(*handle).unwrap_or(0);
            if spawned < *count {
                return Err(ResourceError::Consistency(format!(
                    "Asset {} has {} claims, can not give back {}.",
                    handle, spawned, count
                )));
            }
        }

        for (handle, count) in needed {
            for _ in 0..count {
                self.assets.unspawn(handle)?;
            }
        }
        Ok(())
    }

    /// Explicitly releases one asset record through the normal release path.
    pub fn release_asset(
        &mut self,
        target: AssetHandle,
        helper: &mut dyn ResourceHelper,
    ) -> Result<(), ResourceError> {
        let record = self.assets.get(target).ok_or_else(|| {
            ResourceError::Consistency(format!("Asset {} is not resident.", target))
        })?;
        let spawned = self.assets.spawn_count(target).unwrap_or(0);
        if spawned > 0 {
            return Err(ResourceError::Consistency(format!(
                "Asset '{}' is still in use ({} claims).",
                record.name(),
                spawned
            )));
        }
        record.validate_release(&self.residency)?;
        if self.bundles.spawn_count(record.bundle()).unwrap_or(0) == 0 {
            return Err(ResourceError::Consistency(format!(
                "Bundle {} of asset '{}' holds no claim for it.",
                record.bundle(),
                record.name()
            )));
        }

        let Some(record) = self.assets.remove(target) else {
            return Ok(());
        };
        let result = record.release(false, &mut self.residency, helper);
        let bundle = record.bundle();
        self.assets.recycle(record);
        result?;
        self.bundles.unspawn(bundle)
    }

    pub fn release_bundle(
        &mut self,
        target: BundleHandle,
        helper: &mut dyn ResourceHelper,
    ) -> Result<(), ResourceError> {
        let record = self.bundles.get(target).ok_or_else(|| {
            ResourceError::Consistency(format!("Bundle {} is not resident.", target))
        })?;
        let spawned = self.bundles.spawn_count(target).unwrap_or(0);
        if spawned > 0 {
            return Err(ResourceError::Consistency(format!(
                "Bundle '{}' is still in use ({} claims).",
                record.name(),
                spawned
            )));
        }
        record.validate_release(&self.residency)?;

        let Some(record) = self.bundles.remove(target) else {
            return Ok(());
        };
        let result = record.release(false, &mut self.residency, helper);
        self.bundles.recycle(record);
        result
    }

    pub fn is_asset_releasable(&self, target: AssetHandle) -> bool {
        match (self.assets.get(target), self.assets.spawn_count(target)) {
            (Some(record), Some(0)) => record.custom_can_release(&self.residency),
            _ => false,
        }
    }

    pub fn is_bundle_releasable(&self, target: BundleHandle) -> bool {
        match (self.bundles.get(target), self.bundles.spawn_count(target)) {
            (Some(record), Some(0)) => record.custom_can_release(&self.residency),
            _ => false,
        }
    }

    /// One recycle pass. Candidates are picked before anything is released,
    /// so a record that only became eligible during this pass waits for the
    /// next one.
    pub fn release_unused(
        &mut self,
        helper: &mut dyn ResourceHelper,
    ) -> Result<ReleaseReport, ResourceError> {
        let asset_candidates = self
            .assets
            .unused_targets()
            .into_iter()
            .filter(|target| self.is_asset_releasable(*target))
            .collect::<Vec<_>>();
        let bundle_candidates = self
            .bundles
            .unused_targets()
            .into_iter()
            .filter(|target| self.is_bundle_releasable(*target))
            .collect::<Vec<_>>();

        let mut report = ReleaseReport::default();
        for target in asset_candidates {
            self.release_asset(target, helper)?;
            report.assets.push(target);
        }
        for target in bundle_candidates {
            self.release_bundle(target, helper)?;
            report.bundles.push(target);
        }

        if !report.assets.is_empty() || !report.bundles.is_empty() {
            info!(
                "Released {} assets and {} bundles",
                report.assets.len(),
                report.bundles.len()
            );
        }
        Ok(report)
    }

    /// Releases everything without claim bookkeeping.
    pub fn shutdown(&mut self, helper: &mut dyn ResourceHelper) {
        for target in self.assets.targets() {
            if let Some(record) = self.assets.remove(target) {
                // Shutdown releases never fail
                let _ = record.release(true, &mut self.residency, helper);
                self.assets.recycle(record);
            }
        }
        for target in self.bundles.targets() {
            if let Some(record) = self.bundles.remove(target) {
                let _ = record.release(true, &mut self.residency, helper);
                self.bundles.recycle(record);
            }
        }
        self.scenes.clear();
        self.residency = Residency::default();
    }

    pub fn add_scene(&mut self, name: &str, asset: AssetHandle) {
        self.scenes.insert(name.to_string(), asset);
    }

    pub fn scene(&self, name: &str) -> Option<AssetHandle> {
        self.scenes.get(name).copied()
    }

    pub fn take_scene(&mut self, name: &str) -> Option<AssetHandle> {
        self.scenes.remove(name)
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    pub fn asset_handle(&self, name: &str) -> Option<AssetHandle> {
        self.assets.get_by_name(name).map(|record| record.target())
    }

    pub fn bundle_handle(&self, name: &str) -> Option<BundleHandle> {
        self.bundles.get_by_name(name).map(|record| record.target())
    }

    pub fn asset_spawn_count(&self, target: AssetHandle) -> Option<u32> {
        self.assets.spawn_count(target)
    }

    pub fn bundle_spawn_count(&self, target: BundleHandle) -> Option<u32> {
        self.bundles.spawn_count(target)
    }

    pub fn bundle_dependencies(&self, target: BundleHandle) -> Option<&[BundleHandle]> {
        self.bundles.get(target).map(|record| record.dependency_bundles())
    }
}
