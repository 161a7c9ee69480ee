//! Shared application state, global allocator, and allocator statistics.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use osinfo_core::governor::AllocatedMemory;
use osinfo_core::probe::Platform;
use osinfo_core::scheduler::Scheduler;

/// State handed to every HTTP handler.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) platform: Arc<Platform>,
}

/// Heap usage as reported by jemalloc.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct JemallocStats;

#[cfg(not(target_env = "msvc"))]
impl AllocatedMemory for JemallocStats {
    fn allocated_bytes(&self) -> Option<u64> {
        use std::ptr;

        // SAFETY: mallctl is called with NUL-terminated names and with
        // pointer/length pairs that match the documented value types
        // (uint64_t for "epoch", size_t for "stats.allocated").
        unsafe {
            // Statistics are cached until the epoch is advanced.
            let mut epoch: u64 = 1;
            let rc = tikv_jemalloc_sys::mallctl(
                c"epoch".as_ptr().cast(),
                ptr::null_mut(),
                ptr::null_mut(),
                (&mut epoch as *mut u64).cast(),
                size_of::<u64>(),
            );
            if rc != 0 {
                return None;
            }

            let mut allocated: usize = 0;
            let mut len = size_of::<usize>();
            let rc = tikv_jemalloc_sys::mallctl(
                c"stats.allocated".as_ptr().cast(),
                (&mut allocated as *mut usize).cast(),
                &mut len,
                ptr::null_mut(),
                0,
            );
            (rc == 0).then_some(allocated as u64)
        }
    }
}

#[cfg(target_env = "msvc")]
impl AllocatedMemory for JemallocStats {
    fn allocated_bytes(&self) -> Option<u64> {
        None
    }
}
