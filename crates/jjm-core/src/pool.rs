//! Bounded worker pool for independent per-job remote calls.
//!
//! Work is pulled from a shared cursor by at most `limit` scoped threads and
//! written into the slot with the same index as its input, so callers see
//! results in input order no matter how execution interleaved.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

/// Run `work` over `items` with at most `limit` calls in flight.
///
/// Returns one slot per item. A slot is `None` only if `cancel` was raised
/// before that item was picked up; items already running always finish.
pub fn run_indexed<T, R, F>(items: &[T], limit: usize, cancel: Option<&AtomicBool>, work: F) -> Vec<Option<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let cancelled = || cancel.is_some_and(|flag| flag.load(Ordering::SeqCst));
    let workers = limit.max(1).min(items.len());

    if workers <= 1 {
        return items
            .iter()
            .map(|item| if cancelled() { None } else { Some(work(item)) })
            .collect();
    }

    let cursor = AtomicUsize::new(0);
    let slots: Vec<Mutex<Option<R>>> = items.iter().map(|_| Mutex::new(None)).collect();

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    if cancelled() {
                        break;
                    }
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let (Some(item), Some(slot)) = (items.get(index), slots.get(index)) else {
                        break;
                    };
                    let result = work(item);
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
                }
            });
        }
    });

    slots
        .into_iter()
        .map(|slot| slot.into_inner().unwrap_or_else(PoisonError::into_inner))
        .collect()
}
