// 📚 Batch Orchestrator - bounded fan-out with per-item failure isolation
//
// Successes come back in input order. Failures are dropped from the success list
// (no placeholders) and reported individually, keyed by transaction id.

use crate::error::DetectionError;
use crate::models::Transaction;
use futures::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;
use tracing::{error, info, Instrument};
use uuid::Uuid;

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct BatchFailure<E = DetectionError> {
    pub transaction_id: String,
    /// Position of the transaction in the input
    pub index: usize,
    pub error: E,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome<T, E = DetectionError> {
    pub successes: Vec<T>,
    pub failures: Vec<BatchFailure<E>>,
}

impl<T, E> BatchOutcome<T, E> {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

async fn run_one<'a, F, Fut>(
    index: usize,
    tx: &'a Transaction,
    detect: &F,
) -> (usize, &'a Transaction, Fut::Output)
where
    F: Fn(&'a Transaction) -> Fut,
    Fut: Future,
{
    (index, tx, detect(tx).await)
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOrchestrator {
    concurrency: usize,
}

impl Default for BatchOrchestrator {
    fn default() -> Self {
        BatchOrchestrator::new(DEFAULT_CONCURRENCY)
    }
}

impl BatchOrchestrator {
    pub fn new(concurrency: usize) -> Self {
        BatchOrchestrator {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `detect` once per transaction, at most `concurrency` at a time
    pub async fn detect_batch<'a, T, E, F, Fut>(
        &self,
        transactions: &'a [Transaction],
        detect: F,
    ) -> BatchOutcome<T, E>
    where
        F: Fn(&'a Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", batch_id = %batch_id, size = transactions.len());

        async move {
            info!(concurrency = self.concurrency, "batch_detection_started");

            // `buffered` keeps output order equal to input order
            let results: Vec<(usize, &Transaction, Result<T, E>)> =
                stream::iter(
                    transactions
                        .iter()
                        .enumerate()
                        .map(|(index, tx)| run_one(index, tx, &detect))
                        .collect::<Vec<_>>(),
                )
                .buffered(self.concurrency)
                .collect()
                .await;

            let mut outcome = BatchOutcome {
                successes: Vec::with_capacity(results.len()),
                failures: Vec::new(),
            };

            for (index, tx, result) in results {
                match result {
                    Ok(value) => outcome.successes.push(value),
                    Err(e) => {
                        error!(
                            transaction_id = %tx.id,
                            index,
                            error = %e,
                            "batch_detection_error"
                        );
                        outcome.failures.push(BatchFailure {
                            transaction_id: tx.id.clone(),
                            index,
                            error: e,
                        });
                    }
                }
            }

            info!(
                succeeded = outcome.successes.len(),
                failed = outcome.failures.len(),
                "batch_detection_completed"
            );

            outcome
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testing::tx;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_failures_are_isolated_and_order_kept() {
        let transactions = vec![tx("a", "ONE"), tx("b", "FAIL"), tx("c", "THREE")];

        let outcome = BatchOrchestrator::new(4)
            .detect_batch(&transactions, |tx| async move {
                if tx.description == "FAIL" {
                    Err(format!("boom for {}", tx.id))
                } else {
                    Ok(tx.id.clone())
                }
            })
            .await;

        assert_eq!(outcome.successes, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].transaction_id, "b");
        assert_eq!(outcome.failures[0].index, 1);
        assert_eq!(outcome.total(), 3);
    }

    #[tokio::test]
    async fn test_order_kept_when_later_items_finish_first() {
        let transactions: Vec<Transaction> =
            (0..6).map(|i| tx(&format!("tx-{}", i), "X")).collect();

        let outcome = BatchOrchestrator::new(6)
            .detect_batch(&transactions, |tx| async move {
                let i: u64 = tx.id.trim_start_matches("tx-").parse().unwrap();
                tokio::time::sleep(Duration::from_millis(60 - i * 10)).await;
                Ok::<_, String>(tx.id.clone())
            })
            .await;

        let ids: Vec<&str> = outcome.successes.iter().map(|s| s.as_str()).collect();
        assert_eq!(ids, vec!["tx-0", "tx-1", "tx-2", "tx-3", "tx-4", "tx-5"]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let transactions: Vec<Transaction> =
            (0..10).map(|i| tx(&format!("tx-{}", i), "X")).collect();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let outcome = BatchOrchestrator::new(3)
            .detect_batch(&transactions, |_| {
                let in_flight = &in_flight;
                let peak = &peak;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            })
            .await;

        assert_eq!(outcome.successes.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_zero_concurrency_is_raised_to_one() {
        assert_eq!(BatchOrchestrator::new(0).concurrency(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcome = BatchOrchestrator::default()
            .detect_batch(&[], |tx: &Transaction| {
                let id = tx.id.clone();
                async move { Ok::<_, String>(id) }
            })
            .await;

        assert!(outcome.successes.is_empty());
        assert!(outcome.failures.is_empty());
    }
}
