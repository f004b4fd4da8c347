//! Registry of external resources released during shutdown

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use super::panic_message;
use super::shutdown::ResourceLifecycle;

/// Something holding an external handle (file, store) that must be closed
pub trait ManagedResource: Send + Sync {
    fn name(&self) -> &str;
    fn close(&self) -> Result<()>;
}

/// Closes registered resources in reverse registration order
#[derive(Default)]
pub struct ResourceRegistry {
    resources: Mutex<Vec<Arc<dyn ManagedResource>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resource: Arc<dyn ManagedResource>) {
        log::debug!(target: "roster::resources", "Registered resource '{}'", resource.name());
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resource);
    }

    pub fn len(&self) -> usize {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceLifecycle for ResourceRegistry {
    /// Close everything; one failing resource does not stop the others
    fn release_all(&self) -> bool {
        let resources: Vec<Arc<dyn ManagedResource>> = std::mem::take(
            &mut *self.resources.lock().unwrap_or_else(PoisonError::into_inner),
        );

        let mut clean = true;
        for resource in resources.iter().rev() {
            match panic::catch_unwind(AssertUnwindSafe(|| resource.close())) {
                Ok(Ok(())) => {
                    log::debug!(target: "roster::resources", "Closed '{}'", resource.name());
                }
                Ok(Err(err)) => {
                    clean = false;
                    log::error!(target: "roster::resources", "Failed to close '{}': {:#}", resource.name(), err);
                }
                Err(payload) => {
                    clean = false;
                    log::error!(
                        target: "roster::resources",
                        "Closing '{}' panicked: {}",
                        resource.name(),
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        log::info!(target: "roster::resources", "Released {} resource(s), clean: {}", resources.len(), clean);
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: String,
        fail: bool,
        closed: Arc<Mutex<Vec<String>>>,
    }

    impl ManagedResource for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn close(&self) -> Result<()> {
            self.closed.lock().unwrap().push(self.name.clone());
            if self.fail {
                anyhow::bail!("handle already gone");
            }
            Ok(())
        }
    }

    fn recorder(name: &str, fail: bool, closed: &Arc<Mutex<Vec<String>>>) -> Arc<dyn ManagedResource> {
        Arc::new(Recorder {
            name: name.to_string(),
            fail,
            closed: closed.clone(),
        })
    }

    #[test]
    fn test_release_all_closes_in_reverse_order() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();
        registry.register(recorder("log", false, &closed));
        registry.register(recorder("store", false, &closed));

        assert!(registry.release_all());
        assert_eq!(*closed.lock().unwrap(), vec!["store".to_string(), "log".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failure_is_reported_but_others_still_close() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();
        registry.register(recorder("first", false, &closed));
        registry.register(recorder("broken", true, &closed));

        assert!(!registry.release_all());
        assert_eq!(closed.lock().unwrap().len(), 2);

        // Second call has nothing left to close
        assert!(registry.release_all());
        assert_eq!(closed.lock().unwrap().len(), 2);
    }
}
