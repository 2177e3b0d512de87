//! Global interpreter lock
//!
//! Every object operation runs while this lock is held. The lock is
//! reentrant, so public entry points acquire it unconditionally and nested
//! calls (hooks calling back into the host) are free.

use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::Cell;

static GIL: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Proof that the current thread holds the interpreter lock
pub struct GilGuard {
    _guard: ReentrantMutexGuard<'static, ()>,
}

impl Drop for GilGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Acquire the interpreter lock (reentrant)
#[inline]
pub fn acquire() -> GilGuard {
    let guard = GIL.lock();
    DEPTH.with(|depth| depth.set(depth.get() + 1));
    GilGuard { _guard: guard }
}

/// Run `f` with the interpreter lock held
pub fn with_gil<R>(f: impl FnOnce() -> R) -> R {
    let _gil = acquire();
    f()
}

/// True if the current thread holds the interpreter lock
#[inline]
pub fn is_held() -> bool {
    DEPTH.with(|depth| depth.get() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_acquire_tracks_depth() {
        assert!(!is_held());
        with_gil(|| {
            assert!(is_held());
            with_gil(|| assert!(is_held()));
            assert!(is_held());
        });
        assert!(!is_held());
    }

    #[test]
    fn lock_serializes_threads() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        with_gil(|| {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            std::thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
