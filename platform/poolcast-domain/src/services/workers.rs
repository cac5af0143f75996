use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

/// Runs `task` over every item on up to `workers` scoped threads.
/// Results come back in item order regardless of completion order.
/// With a single worker everything runs inline on the calling thread.
pub fn run_indexed<T, R, F>(items: &[T], workers: usize, task: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    let worker_count = workers.max(1).min(items.len());
    if worker_count <= 1 {
        return items
            .iter()
            .enumerate()
            .map(|(idx, item)| task(idx, item))
            .collect();
    }

    let next_index = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, R)>();
    let task_ref = &task;

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let next_index_ref = &next_index;
            scope.spawn(move || loop {
                let idx = next_index_ref.fetch_add(1, Ordering::Relaxed);
                if idx >= items.len() {
                    break;
                }
                let result = task_ref(idx, &items[idx]);
                if tx.send((idx, result)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
    for (idx, result) in rx {
        slots[idx] = Some(result);
    }
    slots.into_iter().flatten().collect()
}
