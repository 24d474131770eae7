use tokio::sync::{Mutex, MutexGuard};

/// Kinds of state mutation; each kind runs one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationClass {
    AddTransaction,
    SubmitBlock,
}

/// One async mutex per mutation class. Classes are an enum, so two call sites
/// cannot end up on different locks by spelling a key differently.
#[derive(Debug, Default)]
pub struct SubmissionGate {
    add_transaction: Mutex<()>,
    submit_block: Mutex<()>,
}

impl SubmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `class`; released when the guard drops.
    pub async fn lock(&self, class: MutationClass) -> MutexGuard<'_, ()> {
        match class {
            MutationClass::AddTransaction => self.add_transaction.lock().await,
            MutationClass::SubmitBlock => self.submit_block.lock().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_holder_per_class() {
        let gate = Arc::new(SubmissionGate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (gate, inside, max_seen) = (gate.clone(), inside.clone(), max_seen.clone());
                tokio::spawn(async move {
                    let _guard = gate.lock(MutationClass::SubmitBlock).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn classes_do_not_block_each_other() {
        let gate = SubmissionGate::new();
        let _block = gate.lock(MutationClass::SubmitBlock).await;
        let tx = tokio::time::timeout(
            Duration::from_millis(100),
            gate.lock(MutationClass::AddTransaction),
        )
        .await;
        assert!(tx.is_ok());
    }
}
