//! Bounded-concurrency mapping over async operations.
//!
//! [`pmap`] drives at most `concurrency` futures at a time on the current task.
//! Completion order is arbitrary, but the returned vector always matches the
//! input order. The first failure aborts the remaining work and is returned.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Default parallelism for independent subprocess work: the host CPU count.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Map `items` through `f` with at most `concurrency` operations in flight.
///
/// `on_progress` receives each result as it completes together with the
/// running number of completed items. Reporting order follows completion,
/// not input order. A `concurrency` of zero is treated as one.
pub async fn pmap<T, R, E, F, Fut, P>(
    items: Vec<T>,
    concurrency: usize,
    mut f: F,
    mut on_progress: P,
) -> Result<Vec<R>, E>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    P: FnMut(&R, usize),
{
    let limit = concurrency.max(1);
    let total = items.len();
    let mut slots: Vec<Option<R>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    let mut in_flight = stream::iter(items.into_iter().enumerate().map(|(index, item)| {
        let fut = f(item);
        async move { (index, fut.await) }
    }))
    .buffer_unordered(limit);

    let mut completed = 0usize;
    while let Some((index, result)) = in_flight.next().await {
        let value = result?;
        completed += 1;
        on_progress(&value, completed);
        slots[index] = Some(value);
    }

    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn block_on<F: Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }

    async fn yield_times(n: u32) {
        for _ in 0..n {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_empty_input() {
        let out: Result<Vec<u32>, ()> =
            block_on(pmap(Vec::<u32>::new(), 4, |x| async move { Ok(x) }, |_, _| {}));
        assert_eq!(out.unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_zero_concurrency_still_runs() {
        let out: Result<Vec<u32>, ()> =
            block_on(pmap(vec![1, 2, 3], 0, |x| async move { Ok(x * 2) }, |_, _| {}));
        assert_eq!(out.unwrap(), vec![2, 4, 6]);
    }

    #[test]
    fn test_progress_reports_running_count() {
        let mut seen = Vec::new();
        let out: Result<Vec<u32>, ()> = block_on(pmap(
            vec![30u32, 0, 10],
            3,
            |delay| async move {
                yield_times(delay).await;
                Ok(delay)
            },
            |value, completed| seen.push((*value, completed)),
        ));
        assert_eq!(out.unwrap(), vec![30, 0, 10]);
        assert_eq!(seen, vec![(0, 1), (10, 2), (30, 3)]);
    }

    #[test]
    fn test_first_error_is_returned() {
        let started = Rc::new(Cell::new(0usize));
        let out: Result<Vec<u32>, String> = block_on(pmap(
            vec![1u32, 2, 3, 4, 5, 6],
            2,
            |x| {
                let started = started.clone();
                async move {
                    started.set(started.get() + 1);
                    yield_times(x).await;
                    if x == 2 {
                        Err(format!("item {x} failed"))
                    } else {
                        Ok(x)
                    }
                }
            },
            |_, _| {},
        ));
        assert_eq!(out.unwrap_err(), "item 2 failed");
        assert!(started.get() < 6, "remaining items should not start");
    }

    proptest! {
        #[test]
        fn prop_order_preserved_and_limit_respected(
            delays in proptest::collection::vec(0u32..20, 0..40),
            k in 1usize..8,
        ) {
            let active = Rc::new(Cell::new(0usize));
            let peak = Rc::new(Cell::new(0usize));
            let out: Result<Vec<(usize, u32)>, ()> = block_on(pmap(
                delays.iter().copied().enumerate().collect::<Vec<_>>(),
                k,
                |(i, delay)| {
                    let active = active.clone();
                    let peak = peak.clone();
                    async move {
                        active.set(active.get() + 1);
                        peak.set(peak.get().max(active.get()));
                        yield_times(delay).await;
                        active.set(active.get() - 1);
                        Ok((i, delay))
                    }
                },
                |_, _| {},
            ));
            let out = out.unwrap();
            let expected: Vec<(usize, u32)> = delays.iter().copied().enumerate().collect();
            prop_assert_eq!(out, expected);
            prop_assert!(peak.get() <= k);
        }
    }
}
