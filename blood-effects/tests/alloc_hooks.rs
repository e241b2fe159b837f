//! Allocator hooks installed as the global allocator.
//!
//! Lives in its own test binary so the hooks see only this file's tests.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

use blood_effects::alloc::{alloc_stats, register_alloc_hooks, AllocHooks, HookAllocator};
use blood_effects::{drive, install, perform, Effect, EffectDecl, HandlerDef, OpKind, OpTag, Value};

#[global_allocator]
static GLOBAL: HookAllocator = HookAllocator;

static HOOKED_ALLOCS: AtomicUsize = AtomicUsize::new(0);
static HOOKED_FREES: AtomicUsize = AtomicUsize::new(0);

unsafe fn hooked_alloc(layout: Layout) -> *mut u8 {
    HOOKED_ALLOCS.fetch_add(1, Ordering::Relaxed);
    System.alloc(layout)
}

unsafe fn hooked_realloc(block: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    System.realloc(block, layout, new_size)
}

unsafe fn hooked_free(block: *mut u8, layout: Layout) {
    HOOKED_FREES.fetch_add(1, Ordering::Relaxed);
    System.dealloc(block, layout)
}

static HOOKS: AllocHooks = AllocHooks {
    alloc: hooked_alloc,
    realloc: hooked_realloc,
    free: hooked_free,
};

static ASK: EffectDecl = EffectDecl::new("ask", &["ask"]);
static ASK_OP: OpTag = OpTag::new(&ASK, 0);

#[test]
fn runtime_allocations_go_through_hooks() {
    // SAFETY: the hooks delegate to `System`, so blocks allocated before
    // registration are freed by the allocator that produced them.
    unsafe { register_alloc_hooks(Some(&HOOKS)) };
    let before = HOOKED_ALLOCS.load(Ordering::Relaxed);

    let def = HandlerDef::builder(Effect::of(&ASK))
        .op(OpKind::General, ASK_OP, |r, local, _| async move {
            r.release_resume(local, Value::Int(41)).await
        })
        .build();
    let out = drive(install(
        &def,
        Value::Null,
        |_| async { Ok(Value::Int(perform(ASK_OP, Value::Null).await.expect_int() + 1)) },
        Value::Null,
    ));
    assert_eq!(out, Ok(Value::Int(42)));

    assert!(HOOKED_ALLOCS.load(Ordering::Relaxed) > before);
    let stats = alloc_stats();
    assert!(stats.allocations > 0);
    assert!(stats.deallocations > 0);
    assert!(HOOKED_FREES.load(Ordering::Relaxed) > 0);
}
