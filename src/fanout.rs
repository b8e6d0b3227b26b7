//! Bounded, order-preserving fan-out for best-effort batches.
//!
//! Each item yields its value or a [`Diagnostic`]; one failing item never
//! fails the batch. Results come back in input order.

use crate::types::Error;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;

/// Why one item of a batch degraded to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub index: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(index: usize, err: &Error) -> Self {
        Self {
            index,
            message: err.to_string(),
        }
    }
}

/// Run `f` over `items` with at most `limit` in flight.
pub async fn fan_out<I, T, F, Fut>(items: Vec<I>, limit: usize, f: F) -> Vec<Result<T, Diagnostic>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = crate::types::Result<T>>,
{
    let limit = limit.max(1);
    stream::iter(items.into_iter().enumerate().map(|(index, item)| {
        let fut = f(item);
        async move { fut.await.map_err(|e| Diagnostic::new(index, &e)) }
    }))
    .buffered(limit)
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_order_preserved_and_failures_isolated() {
        let out = fan_out(vec![30u64, 0, 10], 3, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            if ms == 0 {
                Err(Error::network("reset"))
            } else {
                Ok(ms)
            }
        })
        .await;

        assert_eq!(out[0], Ok(30));
        assert_eq!(
            out[1],
            Err(Diagnostic {
                index: 1,
                message: "network_error: reset".to_string()
            })
        );
        assert_eq!(out[2], Ok(10));
    }

    #[tokio::test]
    async fn test_concurrency_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = fan_out((0..8).collect::<Vec<u32>>(), 2, |i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            }
        })
        .await;

        assert_eq!(out.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
