//! Bucket lifecycle management.
//!
//! A [`BucketDispatcher`] owns a set of buckets under unique ids, enforces a
//! maximal bucket count, applies default capacity parameters to new buckets
//! and optionally wires an automatic pivot chooser to every bucket it
//! manages. Structural operations (create, add, remove, move) are serialized
//! by a per-dispatcher lock; moving a bucket between dispatchers locks both
//! in a process-wide total order so that two concurrent opposite moves
//! cannot deadlock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use ahash::AHashMap;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::bucket::{Bucket, BucketConfig, OccupationUnit, UNASSIGNED_BUCKET_ID};
use crate::error::{ProximaError, Result};
use crate::object::MetricData;
use crate::object::codec::ObjectCodec;
use crate::pivot::PivotChooser;

/// Process-wide dispatcher identity source, used only for lock ordering.
static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Dispatcher parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximal number of buckets managed at once.
    pub max_buckets: usize,
    /// Capacity parameters applied to buckets created by the dispatcher.
    pub defaults: BucketConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            max_buckets: usize::MAX,
            defaults: BucketConfig::default(),
        }
    }
}

/// How the dispatcher obtains a pivot chooser for a newly managed bucket.
enum AutoChooser<T: MetricData> {
    None,
    /// One chooser instance shared by all buckets.
    Shared(Arc<dyn PivotChooser<T>>),
    /// A fresh chooser instance per bucket.
    PerBucket(Box<dyn Fn() -> Arc<dyn PivotChooser<T>> + Send + Sync>),
}

struct Sweeper {
    shutdown: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Manages a set of buckets under unique ids.
pub struct BucketDispatcher<T: MetricData> {
    dispatcher_id: u64,
    max_buckets: usize,
    defaults: Mutex<BucketConfig>,
    codec: Mutex<Option<Arc<dyn ObjectCodec<T>>>>,
    next_bucket_id: AtomicU32,
    /// Serializes structural operations; always taken before the map lock.
    structural: Mutex<()>,
    buckets: RwLock<AHashMap<u32, Arc<Bucket<T>>>>,
    auto_chooser: Mutex<AutoChooser<T>>,
    choosers: Mutex<AHashMap<u32, Arc<dyn PivotChooser<T>>>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<T: MetricData> std::fmt::Debug for BucketDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketDispatcher")
            .field("max_buckets", &self.max_buckets)
            .field("bucket_count", &self.bucket_count())
            .finish_non_exhaustive()
    }
}

impl<T: MetricData> BucketDispatcher<T> {
    /// Create a dispatcher.
    pub fn new(config: DispatcherConfig) -> Self {
        BucketDispatcher {
            dispatcher_id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed),
            max_buckets: config.max_buckets,
            defaults: Mutex::new(config.defaults),
            codec: Mutex::new(None),
            next_bucket_id: AtomicU32::new(1),
            structural: Mutex::new(()),
            buckets: RwLock::new(AHashMap::new()),
            auto_chooser: Mutex::new(AutoChooser::None),
            choosers: Mutex::new(AHashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Create a dispatcher whose buckets serialize objects with `codec`,
    /// enabling byte-counted bucket creation.
    pub fn with_codec(config: DispatcherConfig, codec: Arc<dyn ObjectCodec<T>>) -> Self {
        let dispatcher = Self::new(config);
        *dispatcher.codec.lock() = Some(codec);
        dispatcher
    }

    /// Attach an object codec used by byte-counted buckets created from now
    /// on.
    pub fn set_object_codec(&self, codec: Arc<dyn ObjectCodec<T>>) {
        let _structural = self.structural.lock();
        *self.codec.lock() = Some(codec);
    }

    /// The maximal number of buckets this dispatcher manages at once.
    pub fn max_buckets(&self) -> usize {
        self.max_buckets
    }

    /// The default capacity parameters for buckets created here.
    pub fn defaults(&self) -> BucketConfig {
        self.defaults.lock().clone()
    }

    /// Replace the default capacity parameters applied to buckets created
    /// from now on.
    pub fn set_defaults(&self, defaults: BucketConfig) {
        let _structural = self.structural.lock();
        *self.defaults.lock() = defaults;
    }

    /// Use one shared pivot chooser for every managed bucket.
    ///
    /// Applies to buckets added from now on; already-managed buckets keep
    /// their choosers.
    pub fn set_auto_chooser(&self, chooser: Arc<dyn PivotChooser<T>>) {
        *self.auto_chooser.lock() = AutoChooser::Shared(chooser);
    }

    /// Create a fresh pivot chooser for every bucket added from now on.
    pub fn set_auto_chooser_per_bucket<F>(&self, factory: F)
    where
        F: Fn() -> Arc<dyn PivotChooser<T>> + Send + Sync + 'static,
    {
        *self.auto_chooser.lock() = AutoChooser::PerBucket(Box::new(factory));
    }

    /// Stop wiring pivot choosers to newly added buckets.
    pub fn clear_auto_chooser(&self) {
        *self.auto_chooser.lock() = AutoChooser::None;
    }

    /// The pivot chooser wired to the given bucket, if any.
    pub fn chooser(&self, bucket_id: u32) -> Option<Arc<dyn PivotChooser<T>>> {
        self.choosers.lock().get(&bucket_id).cloned()
    }

    /// Create a bucket with the dispatcher's default parameters and manage
    /// it.
    pub fn create_bucket(&self) -> Result<Arc<Bucket<T>>> {
        self.create_bucket_with(self.defaults())
    }

    /// Create a bucket with explicit parameters and manage it.
    ///
    /// Byte-counted parameters need the dispatcher's object codec; without
    /// one the creation fails with `InvalidArgument`.
    pub fn create_bucket_with(&self, config: BucketConfig) -> Result<Arc<Bucket<T>>> {
        let _structural = self.structural.lock();
        let bucket = match (config.unit, self.codec.lock().clone()) {
            (OccupationUnit::Bytes, Some(codec)) => {
                Arc::new(Bucket::with_codec(config, codec))
            }
            _ => Arc::new(Bucket::new(config)?),
        };
        self.attach_locked(bucket.clone())?;
        Ok(bucket)
    }

    /// Take over an existing standalone bucket.
    ///
    /// Adding a bucket this dispatcher already manages is a no-op; a bucket
    /// registered with another dispatcher is rejected with `IllegalState`.
    pub fn add_bucket(&self, bucket: Arc<Bucket<T>>) -> Result<u32> {
        let _structural = self.structural.lock();
        let id = bucket.id();
        if id != UNASSIGNED_BUCKET_ID {
            if let Some(existing) = self.buckets.read().get(&id)
                && Arc::ptr_eq(existing, &bucket)
            {
                return Ok(id);
            }
            return Err(ProximaError::illegal_state(format!(
                "bucket {id} is already registered with another dispatcher"
            )));
        }
        self.attach_locked(bucket)
    }

    /// Stop managing a bucket.
    ///
    /// With `destroy` set the bucket's contents are released as well;
    /// release failures are logged and do not fail the removal. The freed
    /// id is never reused.
    pub fn remove_bucket(&self, bucket_id: u32, destroy: bool) -> Result<Arc<Bucket<T>>> {
        let _structural = self.structural.lock();
        let bucket = self.detach_locked(bucket_id)?;
        if destroy {
            let released = bucket.destroy();
            log::debug!("destroyed bucket {bucket_id}, released {released} objects");
        }
        Ok(bucket)
    }

    /// Move a bucket to another dispatcher, retaining its contents.
    ///
    /// The bucket gets a fresh id from the target. Both dispatchers'
    /// structural locks are taken in the process-wide identity order.
    pub fn move_bucket(
        &self,
        bucket_id: u32,
        target: &BucketDispatcher<T>,
    ) -> Result<Arc<Bucket<T>>> {
        if self.dispatcher_id == target.dispatcher_id {
            return Err(ProximaError::illegal_state(
                "cannot move a bucket to the dispatcher that already manages it",
            ));
        }
        let (first, second) = if self.dispatcher_id < target.dispatcher_id {
            (&self.structural, &target.structural)
        } else {
            (&target.structural, &self.structural)
        };
        let _first = first.lock();
        let _second = second.lock();

        if target.buckets.read().len() >= target.max_buckets {
            return Err(ProximaError::capacity_full(format!(
                "target dispatcher already manages {} buckets",
                target.max_buckets
            )));
        }
        let bucket = self.detach_locked(bucket_id)?;
        target.attach_locked(bucket.clone())?;
        Ok(bucket)
    }

    fn attach_locked(&self, bucket: Arc<Bucket<T>>) -> Result<u32> {
        let mut buckets = self.buckets.write();
        if buckets.len() >= self.max_buckets {
            return Err(ProximaError::capacity_full(format!(
                "dispatcher already manages {} buckets",
                self.max_buckets
            )));
        }
        let id = self.next_bucket_id.fetch_add(1, Ordering::Relaxed);
        bucket.set_id(id);
        buckets.insert(id, bucket.clone());
        drop(buckets);

        let chooser = match &*self.auto_chooser.lock() {
            AutoChooser::None => None,
            AutoChooser::Shared(chooser) => Some(chooser.clone()),
            AutoChooser::PerBucket(factory) => Some(factory()),
        };
        if let Some(chooser) = chooser {
            chooser.register_sample_provider(bucket.clone());
            if let Some(filter) = chooser.clone().as_admission_filter() {
                bucket.set_admission_filter(filter);
            }
            self.choosers.lock().insert(id, chooser);
        }
        Ok(id)
    }

    fn detach_locked(&self, bucket_id: u32) -> Result<Arc<Bucket<T>>> {
        let bucket = self.buckets.write().remove(&bucket_id).ok_or_else(|| {
            ProximaError::object_not_found(format!("no bucket with id {bucket_id}"))
        })?;
        bucket.set_id(UNASSIGNED_BUCKET_ID);
        self.choosers.lock().remove(&bucket_id);
        Ok(bucket)
    }

    /// The managed bucket with the given id.
    pub fn get_bucket(&self, bucket_id: u32) -> Result<Arc<Bucket<T>>> {
        self.buckets.read().get(&bucket_id).cloned().ok_or_else(|| {
            ProximaError::object_not_found(format!("no bucket with id {bucket_id}"))
        })
    }

    /// Ids of all managed buckets, ascending.
    pub fn bucket_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.buckets.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// All managed buckets in id order.
    pub fn buckets(&self) -> Vec<Arc<Bucket<T>>> {
        let map = self.buckets.read();
        let mut entries: Vec<(u32, Arc<Bucket<T>>)> =
            map.iter().map(|(id, b)| (*id, b.clone())).collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, b)| b).collect()
    }

    /// Number of managed buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Sum of all managed buckets' occupations. Concurrent mutations may
    /// make the aggregate lag individual buckets.
    pub fn occupation(&self) -> u64 {
        self.buckets.read().values().map(|b| b.occupation()).sum()
    }

    /// Total number of objects across all managed buckets.
    pub fn object_count(&self) -> u64 {
        self.buckets.read().values().map(|b| b.object_count()).sum()
    }

    /// Number of managed buckets currently over their soft capacity.
    pub fn overloaded_count(&self) -> usize {
        self.buckets
            .read()
            .values()
            .filter(|b| b.is_overloaded())
            .count()
    }

    /// Adjust the soft capacity of every managed bucket.
    pub fn set_all_soft_capacity(&self, soft_capacity: u64) {
        for bucket in self.buckets.read().values() {
            bucket.set_soft_capacity(soft_capacity);
        }
    }

    /// Release idle backing resources of every managed bucket. Returns the
    /// number of buckets that actually released something.
    pub fn sweep_idle(&self, record_access: bool) -> usize {
        self.buckets
            .read()
            .values()
            .filter(|b| b.close_temporarily_if_idle(record_access))
            .count()
    }

    /// Start a background thread calling [`BucketDispatcher::sweep_idle`]
    /// every `period`. A previously running sweeper is stopped first. The
    /// thread holds only a weak dispatcher reference and exits when the
    /// dispatcher is dropped.
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) {
        self.stop_sweeper();
        let (shutdown, signal) = bounded::<()>(1);
        let weak = Arc::downgrade(self);
        let handle = thread::spawn(move || {
            loop {
                match signal.recv_timeout(period) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(dispatcher) = weak.upgrade() else {
                            break;
                        };
                        let released = dispatcher.sweep_idle(true);
                        if released > 0 {
                            log::debug!("idle sweep released {released} buckets");
                        }
                    }
                }
            }
        });
        *self.sweeper.lock() = Some(Sweeper {
            shutdown,
            handle: Some(handle),
        });
    }

    /// Stop the background sweeper, waiting for its thread to exit.
    pub fn stop_sweeper(&self) {
        let Some(mut sweeper) = self.sweeper.lock().take() else {
            return;
        };
        let _ = sweeper.shutdown.send(());
        if let Some(handle) = sweeper.handle.take()
            && handle.join().is_err()
        {
            log::warn!("sweeper thread panicked");
        }
    }

    /// Release every managed bucket's contents and stop managing them.
    ///
    /// Teardown is best effort: individual release failures are logged and
    /// the remaining buckets are still processed.
    pub fn destroy(&self) {
        self.stop_sweeper();
        let _structural = self.structural.lock();
        let buckets: Vec<(u32, Arc<Bucket<T>>)> =
            self.buckets.write().drain().collect();
        self.choosers.lock().clear();
        for (id, bucket) in buckets {
            bucket.set_id(UNASSIGNED_BUCKET_ID);
            let released = bucket.destroy();
            log::debug!("destroyed bucket {id}, released {released} objects");
        }
    }
}

impl<T: MetricData> Drop for BucketDispatcher<T> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
