/// Opaque handle of an asset instantiated by the engine helper.
/// The loader never looks inside, it only uses handles as map keys.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetHandle(u64);

/// Opaque handle of a bundle parsed or read by the engine helper.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleHandle(u64);

impl AssetHandle {
    pub fn from_raw(raw: u64) -> Self {
        AssetHandle(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl BundleHandle {
    pub fn from_raw(raw: u64) -> Self {
        BundleHandle(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Asset#{}", self.0)
    }
}

impl std::fmt::Display for BundleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bundle#{}", self.0)
    }
}

/// Target passed to `ResourceHelper::release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseTarget {
    Asset(AssetHandle),
    Bundle(BundleHandle),
}
