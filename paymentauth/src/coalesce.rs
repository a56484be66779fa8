//! Verification coalescing.
//!
//! Verification usually costs a network round-trip to a ledger, and client
//! retry-on-timeout behavior makes concurrent duplicate requests for the
//! same transaction common. The coalescer guarantees that while one
//! verification call for a reference is in flight, every concurrent caller
//! for that reference joins it and observes the same eventual result or
//! error, without a second call to the verifier.
//!
//! An entry is removed once its call settles, so a later independent call
//! for the same reference (a retry) runs fresh.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use crate::error::VerifierError;
use crate::verifier::Verification;

type SharedVerify = Shared<BoxFuture<'static, Result<Verification, Arc<VerifierError>>>>;

/// Per-reference single-flight map over verification calls.
#[derive(Debug, Default)]
pub struct VerifyCoalescer {
    in_flight: DashMap<String, SharedVerify>,
}

impl VerifyCoalescer {
    /// Creates an empty coalescer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of references with an in-flight verification.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Runs (or joins) the verification for `reference`.
    ///
    /// If no call is in flight for `reference`, `run` is invoked once and
    /// its future shared; otherwise the pending call is joined and `run` is
    /// dropped unused. First-to-complete wins: all joiners see the one
    /// authoritative result.
    ///
    /// # Errors
    ///
    /// Propagates the underlying verifier error, shared across all joiners.
    pub async fn verify<F, Fut>(
        &self,
        reference: &str,
        run: F,
    ) -> Result<Verification, Arc<VerifierError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Verification, VerifierError>> + Send + 'static,
    {
        let shared = match self.in_flight.entry(reference.to_owned()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let fut: BoxFuture<'static, _> =
                    run().map(|result| result.map_err(Arc::new)).boxed();
                let shared = fut.shared();
                vacant.insert(shared.clone());
                shared
            }
        };

        let result = shared.clone().await;

        // Only remove the entry we awaited; a retry may already have
        // installed a fresh round for this reference.
        self.in_flight
            .remove_if(reference, |_, current| current.ptr_eq(&shared));

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    const REF: &str = "0xabc";

    #[tokio::test]
    async fn concurrent_calls_share_one_verifier_invocation() {
        let coalescer = Arc::new(VerifyCoalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Semaphore::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                coalescer
                    .verify(REF, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _permit = release.acquire().await.expect("semaphore open");
                        Ok(Verification::valid().with_payer("0xpayer"))
                    })
                    .await
            }));
        }

        // Give every task a chance to join the in-flight entry, then let the
        // single underlying call settle.
        tokio::task::yield_now().await;
        release.add_permits(1);

        for handle in handles {
            let verdict = handle.await.unwrap().unwrap();
            assert!(verdict.valid);
            assert_eq!(verdict.payer.as_deref(), Some("0xpayer"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn errors_are_shared_with_every_joiner() {
        let coalescer = Arc::new(VerifyCoalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Semaphore::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                coalescer
                    .verify(REF, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _permit = release.acquire().await.expect("semaphore open");
                        Err(VerifierError::new("rpc unreachable"))
                    })
                    .await
            }));
        }

        tokio::task::yield_now().await;
        release.add_permits(1);

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.message, "rpc unreachable");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn settled_entries_allow_a_fresh_round() {
        let coalescer = VerifyCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let verdict = coalescer
                .verify(REF, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Verification::valid())
                })
                .await
                .unwrap();
            assert!(verdict.valid);
        }

        // Sequential rounds each run their own call.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_references_do_not_coalesce() {
        let coalescer = Arc::new(VerifyCoalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let calls = Arc::clone(&calls);
            coalescer.verify("0xaaa", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Verification::valid())
            })
        };
        let b = {
            let calls = Arc::clone(&calls);
            coalescer.verify("0xbbb", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Verification::invalid("wrong amount"))
            })
        };

        let (a, b) = tokio::join!(a, b);
        assert!(a.unwrap().valid);
        assert!(!b.unwrap().valid);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
