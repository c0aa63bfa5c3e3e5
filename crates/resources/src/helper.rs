use crate::binding::Binding;
use crate::descriptor::{LoadType, StorageArea};
use crate::error::{LoadProgress, LoadResourceStatus};
use crate::handle::{AssetHandle, BundleHandle, ReleaseTarget};
use crossbeam_channel::{Receiver, Sender};
use std::any::TypeId;
use web_time::Duration;

/// Identifies one dispatched helper operation.
/// Every request carries a fresh ticket and the owning agent accepts exactly
/// one terminal completion for it; anything else is discarded as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationTicket {
    agent: usize,
    serial: u64,
}

impl OperationTicket {
    pub(crate) fn new(agent: usize, serial: u64) -> Self {
        OperationTicket { agent, serial }
    }

    pub fn agent(&self) -> usize {
        self.agent
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl std::fmt::Display for OperationTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ticket({}, {})", self.agent, self.serial)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadTarget {
    /// A standalone file on disk.
    Path(String),
    /// An entry inside a virtual file system group.
    FileSystem {
        file_system: String,
        storage: StorageArea,
        entry: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantiateRequest {
    pub bundle: BundleHandle,
    pub asset_name: String,
    pub asset_type: Option<TypeId>,
    pub is_scene: bool,
}

#[derive(Debug)]
pub enum HelperRequest {
    ReadFile(ReadTarget),
    ReadBytes(ReadTarget),
    ParseBytes(Vec<u8>),
    LoadAsset(InstantiateRequest),
    /// Abort whatever the agent had in flight. Never answered.
    Reset,
}

#[derive(Debug)]
pub struct ToHelperMessage {
    pub ticket: OperationTicket,
    pub request: HelperRequest,
}

#[derive(Debug)]
pub enum HelperEvent {
    ReadFileComplete(BundleHandle),
    ReadBytesComplete(Vec<u8>),
    ParseBytesComplete(BundleHandle),
    LoadComplete(AssetHandle),
    Progress(LoadProgress, f32),
    Error(LoadResourceStatus, String),
}

#[derive(Debug)]
pub struct FromHelperMessage {
    pub ticket: OperationTicket,
    pub event: HelperEvent,
}

/// Helper side of the loader's I/O channel.
/// Receives read/parse/instantiate requests and answers with completions.
#[derive(Clone)]
pub struct HelperBinding {
    inner: Binding<ToHelperMessage, FromHelperMessage>,
}

impl HelperBinding {
    pub(crate) fn new() -> (Self, Sender<ToHelperMessage>, Receiver<FromHelperMessage>) {
        let (inner, to_sender, from_receiver) = Binding::new();
        (HelperBinding { inner }, to_sender, from_receiver)
    }

    pub fn send(&self, message: FromHelperMessage) -> bool {
        self.inner.send(message)
    }

    pub fn complete(&self, ticket: OperationTicket, event: HelperEvent) -> bool {
        self.inner.send(FromHelperMessage { ticket, event })
    }

    pub fn recv(&self, timeout: Duration) -> Option<ToHelperMessage> {
        self.inner.recv(timeout)
    }

    pub fn try_recv(&self) -> Option<ToHelperMessage> {
        self.inner.try_recv()
    }
}

/// Synchronous unload of resident handles.
pub trait ResourceHelper {
    fn release(&mut self, target: ReleaseTarget);
}

/// Everything known about a bundle at the moment its bytes get decrypted.
#[derive(Debug, Clone)]
pub struct DecryptContext<'a> {
    pub start_index: usize,
    pub length: usize,
    pub name: &'a str,
    pub variant: Option<&'a str>,
    pub extension: &'a str,
    pub storage: StorageArea,
    pub file_system: Option<&'a str>,
    pub load_type: LoadType,
    pub total_length: u64,
    pub hash_code: u32,
}

/// Decrypts bundle bytes in place. Only invoked for the memory-decrypt load types.
pub type DecryptResourceCallback = Box<dyn FnMut(&mut [u8], &DecryptContext<'_>)>;

/// The engine-specific work behind a `BasicLoadHelper`.
pub trait LoadHelperHandler {
    fn read_file(&mut self, target: &ReadTarget) -> anyhow::Result<BundleHandle>;
    fn read_bytes(&mut self, target: &ReadTarget) -> anyhow::Result<Vec<u8>>;
    fn parse_bytes(&mut self, bytes: Vec<u8>) -> anyhow::Result<BundleHandle>;
    fn load_asset(&mut self, request: &InstantiateRequest) -> anyhow::Result<AssetHandle>;

    fn reset(&mut self, _ticket: OperationTicket) {}
}

// Answers every request synchronously with the handler's result.
// Can be driven from a dedicated thread (process_events) or inline between
// loader updates (process_pending).
pub struct BasicLoadHelper {
    binding: Option<HelperBinding>,
}

impl BasicLoadHelper {
    pub fn new() -> Self {
        BasicLoadHelper { binding: None }
    }

    pub fn bind(&mut self, binding: HelperBinding) {
        self.binding = Some(binding);
    }

    fn send(&self, ticket: OperationTicket, event: HelperEvent) {
        if let Some(binding) = &self.binding {
            binding.complete(ticket, event);
        }
    }

    fn handle<H: LoadHelperHandler>(&self, handler: &mut H, message: ToHelperMessage) {
        let ticket = message.ticket;
        match message.request {
            HelperRequest::ReadFile(target) => match handler.read_file(&target) {
                Ok(bundle) => self.send(ticket, HelperEvent::ReadFileComplete(bundle)),
                Err(err) => self.send(
                    ticket,
                    HelperEvent::Error(LoadResourceStatus::NotExist, err.to_string()),
                ),
            },
            HelperRequest::ReadBytes(target) => match handler.read_bytes(&target) {
                Ok(bytes) => self.send(ticket, HelperEvent::ReadBytesComplete(bytes)),
                Err(err) => self.send(
                    ticket,
                    HelperEvent::Error(LoadResourceStatus::NotExist, err.to_string()),
                ),
            },
            HelperRequest::ParseBytes(bytes) => match handler.parse_bytes(bytes) {
                Ok(bundle) => self.send(ticket, HelperEvent::ParseBytesComplete(bundle)),
                Err(err) => self.send(
                    ticket,
                    HelperEvent::Error(LoadResourceStatus::NotReady, err.to_string()),
                ),
            },
            HelperRequest::LoadAsset(request) => match handler.load_asset(&request) {
                Ok(asset) => self.send(ticket, HelperEvent::LoadComplete(asset)),
                Err(err) => self.send(
                    ticket,
                    HelperEvent::Error(LoadResourceStatus::AssetError, err.to_string()),
                ),
            },
            HelperRequest::Reset => handler.reset(ticket),
        }
    }

    /// Blocks for up to `timeout` per message until the channel goes quiet.
    pub fn process_events<H: LoadHelperHandler>(&self, handler: &mut H, timeout: Duration) {
        let Some(binding) = &self.binding else {
            log::error!("Load helper not bound to any queues.");
            return;
        };

        while let Some(message) = binding.recv(timeout) {
            self.handle(handler, message);
        }
    }

    /// Answers everything already queued without blocking.
    /// Returns the number of handled requests.
    pub fn process_pending<H: LoadHelperHandler>(&self, handler: &mut H) -> usize {
        let Some(binding) = &self.binding else {
            log::error!("Load helper not bound to any queues.");
            return 0;
        };

        let mut handled = 0;
        while let Some(message) = binding.try_recv() {
            self.handle(handler, message);
            handled += 1;
        }
        handled
    }
}

impl Default for BasicLoadHelper {
    fn default() -> Self {
        Self::new()
    }
}
