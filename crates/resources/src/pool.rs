use crate::error::ResourceError;
use log::debug;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use web_time::Instant;

/// Objects that can be returned to a free list and handed out again.
pub(crate) trait Recyclable: Default {
    fn clear(&mut self);
}

/// Explicit free list of cleared slots.
pub(crate) struct FreeList<T: Recyclable> {
    free: Vec<T>,
}

impl<T: Recyclable> FreeList<T> {
    pub fn new() -> Self {
        FreeList { free: Vec::new() }
    }

    pub fn acquire(&mut self) -> T {
        self.free.pop().unwrap_or_default()
    }

    pub fn recycle(&mut self, mut item: T) {
        item.clear();
        self.free.push(item);
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

pub(crate) trait PooledRecord: Recyclable {
    type Target: Copy + Eq + Hash + Debug;

    fn name(&self) -> &str;
    fn target(&self) -> Self::Target;
}

struct PoolEntry<R> {
    record: R,
    spawn_count: u32,
    last_use: Instant,
}

/// Name-keyed pool of resident records.
///
/// Tracks how many outstanding claims ("spawns") each record has. A record is
/// in use while its spawn count is positive. The pool never evicts on its own;
/// callers pick release candidates with `unused_targets` and decide.
pub(crate) struct ObjectPool<R: PooledRecord> {
    label: &'static str,
    entries: HashMap<R::Target, PoolEntry<R>>,
    by_name: HashMap<String, R::Target>,
    free: FreeList<R>,
}

impl<R: PooledRecord> ObjectPool<R> {
    pub fn new(label: &'static str) -> Self {
        ObjectPool {
            label,
            entries: HashMap::new(),
            by_name: HashMap::new(),
            free: FreeList::new(),
        }
    }

    /// Hands out a cleared record slot, reusing a released one when possible.
    pub fn acquire(&mut self) -> R {
        self.free.acquire()
    }

    pub fn recycle(&mut self, record: R) {
        self.free.recycle(record);
    }

    pub fn register(&mut self, record: R, spawned: bool) -> Result<(), ResourceError> {
        let target = record.target();
        if self.entries.contains_key(&target) {
            return Err(ResourceError::Consistency(format!(
                "{} pool already holds target {:?}",
                self.label, target
            )));
        }
        if self.by_name.contains_key(record.name()) {
            return Err(ResourceError::Consistency(format!(
                "{} pool already holds '{}'",
                self.label,
                record.name()
            )));
        }

        debug!(
            "{} pool registers '{}' ({:?}, spawned: {})",
            self.label,
            record.name(),
            target,
            spawned
        );
        self.by_name.insert(record.name().to_string(), target);
        self.entries.insert(
            target,
            PoolEntry {
                record,
                spawn_count: if spawned { 1 } else { 0 },
                last_use: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn can_spawn(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Takes one claim on the record called `name`.
    pub fn spawn(&mut self, name: &str) -> Option<&R> {
        let target = *self.by_name.get(name)?;
        let entry = self.entries.get_mut(&target)?;
        entry.spawn_count += 1;
        entry.last_use = Instant::now();
        debug!(
            "{} pool spawns '{}' (spawn count {})",
            self.label, name, entry.spawn_count
        );
        Some(&entry.record)
    }

    /// Gives one claim back.
    pub fn unspawn(&mut self, target: R::Target) -> Result<(), ResourceError> {
        let entry = self.entries.get_mut(&target).ok_or_else(|| {
            ResourceError::Consistency(format!(
                "{} pool can not find target {:?} to unspawn",
                self.label, target
            ))
        })?;
        if entry.spawn_count == 0 {
            return Err(ResourceError::Consistency(format!(
                "{} pool target '{}' is not spawned",
                self.label,
                entry.record.name()
            )));
        }

        entry.spawn_count -= 1;
        entry.last_use = Instant::now();
        debug!(
            "{} pool unspawns '{}' (spawn count {})",
            self.label,
            entry.record.name(),
            entry.spawn_count
        );
        Ok(())
    }

    pub fn get(&self, target: R::Target) -> Option<&R> {
        self.entries.get(&target).map(|entry| &entry.record)
    }

    pub fn get_mut(&mut self, target: R::Target) -> Option<&mut R> {
        self.entries.get_mut(&target).map(|entry| &mut entry.record)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&R> {
        self.by_name.get(name).and_then(|target| self.get(*target))
    }

    pub fn contains(&self, target: R::Target) -> bool {
        self.entries.contains_key(&target)
    }

    pub fn spawn_count(&self, target: R::Target) -> Option<u32> {
        self.entries.get(&target).map(|entry| entry.spawn_count)
    }

    /// Records nobody holds a claim on, oldest use first.
    pub fn unused_targets(&self) -> Vec<R::Target> {
        let mut unused = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.spawn_count == 0)
            .map(|(target, entry)| (*target, entry.last_use))
            .collect::<Vec<_>>();
        unused.sort_by_key(|(_, last_use)| *last_use);
        unused.into_iter().map(|(target, _)| target).collect()
    }

    pub fn targets(&self) -> Vec<R::Target> {
        self.entries.keys().copied().collect()
    }

    /// Detaches the record from both maps without touching anything else.
    pub fn remove(&mut self, target: R::Target) -> Option<R> {
        let entry = self.entries.remove(&target)?;
        self.by_name.remove(entry.record.name());
        debug!("{} pool removes '{}'", self.label, entry.record.name());
        Some(entry.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free.free_count()
    }
}
