use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Locks render state, taking over the value left behind by a panicked holder.
///
/// The poison flag is cleared after recovery so one panic logs one warning.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    owner: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            target = "util::lock",
            op,
            owner,
            result = "poison_cleared",
            "render state lock was poisoned; continuing with last written value"
        );
        lock.clear_poison();
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn takes_over_a_poisoned_mutex_once() {
        let lock = Arc::new(Mutex::new(vec![1]));
        let cloned = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let mut guard = cloned.lock().expect("first lock");
            guard.push(2);
            panic!("poison");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(*mutex_lock(&lock, "tests", "recover"), vec![1, 2]);
        assert!(!lock.is_poisoned());
    }
}
