use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-address async lock. Subscribe and unsubscribe for the same contract
/// address run one at a time, across their awaits on the chain provider.
#[derive(Default)]
pub struct AddressGate {
    gates: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl AddressGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, address: &str) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            match gates.get(address).and_then(Weak::upgrade) {
                Some(gate) => gate,
                None => {
                    gates.retain(|_, gate| gate.strong_count() > 0);
                    let gate = Arc::new(AsyncMutex::new(()));
                    gates.insert(address.to_string(), Arc::downgrade(&gate));
                    gate
                }
            }
        };

        gate.lock_owned().await
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|gate| gate.strong_count() > 0)
            .count()
    }
}
