//! # Allocator Hooks
//!
//! Process-wide replaceable allocate/reallocate/free functions.
//!
//! [`HookAllocator`] is a [`GlobalAlloc`] that routes every request through the
//! registered [`AllocHooks`], falling back to the platform allocator when none
//! are registered. Installing it with `#[global_allocator]` makes every
//! allocation of the runtime (frames, captured bodies, request nodes, arena
//! objects) go through the hooks, and keeps the counters reported by
//! [`alloc_stats`].
//!
//! ```rust,ignore
//! use blood_effects::alloc::HookAllocator;
//!
//! #[global_allocator]
//! static GLOBAL: HookAllocator = HookAllocator;
//! ```
//!
//! Blocks must be freed by the hooks that allocated them, so hooks are meant
//! to be registered once, before the first allocation they should see.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

/// Replacement allocation functions.
///
/// Each function has the contract of the matching [`GlobalAlloc`] method.
#[derive(Debug, Clone, Copy)]
pub struct AllocHooks {
    /// Allocate a block for `layout`; null on failure.
    pub alloc: unsafe fn(Layout) -> *mut u8,
    /// Resize a block allocated with `layout` to `new_size` bytes.
    pub realloc: unsafe fn(*mut u8, Layout, usize) -> *mut u8,
    /// Free a block allocated with `layout`.
    pub free: unsafe fn(*mut u8, Layout),
}

static HOOKS: AtomicPtr<AllocHooks> = AtomicPtr::new(ptr::null_mut());

static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static DEALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Register allocation hooks, or restore the platform allocator with `None`.
///
/// Returns the previously registered hooks.
///
/// # Safety
///
/// [`HookAllocator`] frees every block through whatever hooks are registered
/// at the time of the free. The caller must guarantee that every block still
/// live when the hooks change can be freed and resized by the new hooks, for
/// example because both sets of hooks delegate to the same allocator, or
/// because the hooks are registered before any block they will see exists.
///
/// Registration therefore needs an `unsafe` block:
///
/// ```compile_fail
/// blood_effects::alloc::register_alloc_hooks(None);
/// ```
pub unsafe fn register_alloc_hooks(
    hooks: Option<&'static AllocHooks>,
) -> Option<&'static AllocHooks> {
    let raw = hooks.map_or(ptr::null_mut(), |h| ptr::from_ref(h).cast_mut());
    let previous = HOOKS.swap(raw, Ordering::AcqRel);
    // SAFETY: only `&'static AllocHooks` are ever stored.
    unsafe { previous.as_ref() }
}

fn hooks() -> Option<&'static AllocHooks> {
    // SAFETY: only `&'static AllocHooks` are ever stored.
    unsafe { HOOKS.load(Ordering::Acquire).as_ref() }
}

/// Counters kept by [`HookAllocator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Successful allocations.
    pub allocations: u64,
    /// Frees.
    pub deallocations: u64,
    /// Bytes currently allocated.
    pub live_bytes: usize,
}

/// Snapshot of the allocator counters. All zero unless [`HookAllocator`] is
/// the global allocator (or called directly).
pub fn alloc_stats() -> AllocStats {
    AllocStats {
        allocations: ALLOCATIONS.load(Ordering::Relaxed),
        deallocations: DEALLOCATIONS.load(Ordering::Relaxed),
        live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
    }
}

/// Global allocator dispatching through the registered [`AllocHooks`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HookAllocator;

unsafe impl GlobalAlloc for HookAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let block = match hooks() {
            Some(h) => (h.alloc)(layout),
            None => System.alloc(layout),
        };
        if !block.is_null() {
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
            LIVE_BYTES.fetch_add(layout.size(), Ordering::Relaxed);
        }
        block
    }

    unsafe fn dealloc(&self, block: *mut u8, layout: Layout) {
        match hooks() {
            Some(h) => (h.free)(block, layout),
            None => System.dealloc(block, layout),
        }
        DEALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
    }

    unsafe fn realloc(&self, block: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let resized = match hooks() {
            Some(h) => (h.realloc)(block, layout, new_size),
            None => System.realloc(block, layout, new_size),
        };
        if !resized.is_null() {
            LIVE_BYTES.fetch_add(new_size, Ordering::Relaxed);
            LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
        }
        resized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

    unsafe fn counting_alloc(layout: Layout) -> *mut u8 {
        HOOK_CALLS.fetch_add(1, Ordering::Relaxed);
        System.alloc(layout)
    }

    unsafe fn counting_realloc(block: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        HOOK_CALLS.fetch_add(1, Ordering::Relaxed);
        System.realloc(block, layout, new_size)
    }

    unsafe fn counting_free(block: *mut u8, layout: Layout) {
        HOOK_CALLS.fetch_add(1, Ordering::Relaxed);
        System.dealloc(block, layout)
    }

    static COUNTING: AllocHooks = AllocHooks {
        alloc: counting_alloc,
        realloc: counting_realloc,
        free: counting_free,
    };

    #[test]
    fn test_hooks_receive_every_call() {
        // SAFETY: the counting hooks delegate to `System`, like the default.
        let previous = unsafe { register_alloc_hooks(Some(&COUNTING)) };
        assert!(previous.is_none());
        let before = alloc_stats();
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let block = HookAllocator.alloc(layout);
            assert!(!block.is_null());
            let block = HookAllocator.realloc(block, layout, 128);
            assert!(!block.is_null());
            HookAllocator.dealloc(block, Layout::from_size_align(128, 8).unwrap());
        }
        let after = alloc_stats();
        // SAFETY: as above.
        let restored = unsafe { register_alloc_hooks(None) };
        assert!(restored.is_some());

        assert_eq!(HOOK_CALLS.load(Ordering::Relaxed), 3);
        assert_eq!(after.allocations - before.allocations, 1);
        assert_eq!(after.deallocations - before.deallocations, 1);
        assert_eq!(after.live_bytes, before.live_bytes);
    }
}
