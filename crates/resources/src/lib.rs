//! Resource loading for named assets packed into bundles.
//!
//! The [`ResourceLoader`] schedules load tasks over a fixed set of agents,
//! keeps resident assets and bundles in reference counted pools and talks to
//! the engine through a [`HelperBinding`]. Everything runs on the thread that
//! calls [`ResourceLoader::update`]; the helper may live anywhere.

mod agent;
pub mod binding;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod helper;
pub mod loader;
pub(crate) mod pool;
pub(crate) mod record;
pub mod task;

pub use agent::AgentState;
pub use config::LoaderConfig;
pub use descriptor::{
    AssetInfo, Catalog, LoadType, MemoryCatalog, ResourceDescriptor, ResourceName, StorageArea,
};
pub use error::{LoadProgress, LoadResourceStatus, ResourceError};
pub use handle::{AssetHandle, BundleHandle, ReleaseTarget};
pub use helper::{
    BasicLoadHelper, DecryptContext, DecryptResourceCallback, FromHelperMessage, HelperBinding,
    HelperEvent, HelperRequest, InstantiateRequest, LoadHelperHandler, OperationTicket,
    ReadTarget, ResourceHelper, ToHelperMessage,
};
pub use loader::{LoaderStats, ResourceLoader, ResourceLoaderBuilder};
pub use record::ReleaseReport;
pub use task::{
    LoadAssetCallbacks, LoadAssetRequest, LoadSceneCallbacks, TaskId, TaskInfo, TaskStatus,
    UserData,
};
