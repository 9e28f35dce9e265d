use parking_lot::lock_api::RawRwLock as RawRwLockApi;
use parking_lot::RawRwLock;

/// Reader-writer latch with manual acquire/release.
///
/// The global transaction latch is taken in `begin` and released in
/// `commit`/`abort`, which a scoped guard cannot express. Callers must
/// pair every acquire with exactly one release.
pub struct ReaderWriterLatch {
    raw: RawRwLock,
}

impl ReaderWriterLatch {
    pub fn new() -> Self {
        Self {
            raw: <RawRwLock as RawRwLockApi>::INIT,
        }
    }

    pub fn lock_shared(&self) {
        self.raw.lock_shared();
    }

    pub fn unlock_shared(&self) {
        // Caller holds a shared acquisition from lock_shared.
        unsafe { self.raw.unlock_shared() }
    }

    pub fn lock_exclusive(&self) {
        self.raw.lock_exclusive();
    }

    pub fn unlock_exclusive(&self) {
        // Caller holds the exclusive acquisition from lock_exclusive.
        unsafe { self.raw.unlock_exclusive() }
    }
}

impl Default for ReaderWriterLatch {
    fn default() -> Self {
        Self::new()
    }
}
