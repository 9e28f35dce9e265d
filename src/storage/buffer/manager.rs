use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::config::BufferPoolConfig;
use crate::common::types::{FrameId, Page, PageId, PagePtr, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping, owned by the instance mutex.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolState {
    frames: Vec<FrameMeta>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// One buffer pool instance: a fixed array of frames caching disk pages,
/// a page table mapping resident page ids to frames, a free list, and an
/// LRU replacer for victim selection.
///
/// Instance `i` of `N` allocates page ids congruent to `i` modulo `N`.
/// Page 0 is never allocated; it is the well-known header page and is
/// materialized on first fetch.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    pages: Vec<PagePtr>,
    replacer: LRUReplacer,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        let BufferPoolConfig {
            pool_size,
            num_instances,
            instance_index,
        } = config;
        assert!(pool_size > 0, "buffer pool needs at least one frame");

        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            pages.push(Arc::new(parking_lot::RwLock::new(Page::new(
                INVALID_PAGE_ID,
            ))));
            frames.push(FrameMeta::empty());
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            pages,
            replacer: LRUReplacer::new(pool_size),
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index as PageId,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetch a page, reading it from disk if it is not resident.
    /// The returned page is pinned; the caller must unpin it exactly once.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        // Already resident: pin and return.
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id].pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(Arc::clone(&self.pages[frame_id]));
        }

        let frame_id = self.take_victim_frame(&mut state)?;

        {
            let mut page = self.pages[frame_id].write();
            page.page_id = page_id;
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page.data) {
                page.reset();
                drop(page);
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
        Ok(Arc::clone(&self.pages[frame_id]))
    }

    /// Allocate a fresh page id and install a zeroed page for it.
    /// The page is returned pinned and clean; the caller dirties it when
    /// unpinning after the first write.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();
        let page_id = self.allocate_page_id(&mut state);
        let frame_id = self.take_victim_frame(&mut state)?;

        {
            let mut page = self.pages[frame_id].write();
            page.reset();
            page.page_id = page_id;
        }

        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
        Ok((Arc::clone(&self.pages[frame_id]), page_id))
    }

    /// Drop one pin on the page, ORing in the dirty flag.
    /// Returns true iff a pin was actually released.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            warn!("unpin of non-resident page {}", page_id);
            return false;
        };

        let meta = &mut state.frames[frame_id];
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            warn!("unpin of already unpinned page {}", page_id);
            return false;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Remove a page from the pool and deallocate it on disk.
    /// Returns false while the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            self.disk_manager.deallocate_page(page_id);
            return true;
        };

        if state.frames[frame_id].pin_count > 0 {
            return false;
        }

        state.page_table.remove(&page_id);
        state.frames[frame_id] = FrameMeta::empty();
        self.pages[frame_id].write().reset();
        // The freed frame moves to the free list; keep it out of the
        // replacer so the two stay disjoint.
        self.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        true
    }

    /// Write a resident page to disk unconditionally.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        // Pin the frame so eviction cannot race the flush, then write
        // under the read latch. The latch is taken without the instance
        // mutex held, since latch holders may call back into the pool.
        let page_ptr = {
            let mut state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Err(BufferPoolError::PageNotFound(page_id));
            };
            state.frames[frame_id].pin_count += 1;
            self.replacer.pin(frame_id);
            Arc::clone(&self.pages[frame_id])
        };

        let page = page_ptr.read();
        // The read latch keeps writers out, so the clean mark cannot
        // swallow a concurrent modification.
        {
            let mut state = self.state.lock();
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                state.frames[frame_id].is_dirty = false;
            }
        }
        let result = self
            .disk_manager
            .write_page(page_id, &page.data)
            .map_err(BufferPoolError::from);
        drop(page);
        self.unpin_page(page_id, result.is_err());
        result
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in resident {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Concurrent eviction between the snapshot and the flush.
                Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Current pin count of a resident page, if any.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.frames[frame_id].pin_count)
    }

    /// Whether the page currently occupies a frame.
    pub fn contains_page(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    fn allocate_page_id(&self, state: &mut PoolState) -> PageId {
        let mut page_id = state.next_page_id;
        if page_id == HEADER_PAGE_ID {
            page_id += self.num_instances as PageId;
        }
        state.next_page_id = page_id + self.num_instances as PageId;
        debug_assert_eq!(
            page_id.rem_euclid(self.num_instances as PageId),
            self.instance_index as PageId
        );
        page_id
    }

    /// Pick a frame to hold a new page: free list first, then the
    /// replacer. A dirty victim is written back before its frame is
    /// reused.
    fn take_victim_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .replacer
            .victim()
            .ok_or(BufferPoolError::OutOfMemory)?;
        let old_page_id = state.frames[frame_id].page_id;
        debug_assert_eq!(state.frames[frame_id].pin_count, 0);

        if old_page_id != INVALID_PAGE_ID {
            if state.frames[frame_id].is_dirty {
                debug!("evicting dirty page {}", old_page_id);
                let page = self.pages[frame_id].read();
                if let Err(e) = self.disk_manager.write_page(old_page_id, &page.data) {
                    drop(page);
                    // Put the frame back; the page table was not touched.
                    self.replacer.unpin(frame_id);
                    return Err(e.into());
                }
            }
            state.page_table.remove(&old_page_id);
            state.frames[frame_id] = FrameMeta::empty();
        }
        Ok(frame_id)
    }
}
