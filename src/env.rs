//! Host environment: instance title and lifecycle signals.

use std::sync::{Arc, Mutex};

/// Callbacks the bridge installs into its environment.
pub trait LifecycleHooks: Send + Sync {
    /// The page/window became visible again.
    fn resumed(&self);

    /// An unrecoverable in-page error occurred.
    ///
    /// Returns true when the host's default error handling should still run.
    fn runtime_error(&self) -> bool;
}

/// The host the bridge runs in.
pub trait Environment: Send + Sync {
    /// Default instance label (e.g. the document title).
    fn title(&self) -> String;

    /// Registers lifecycle callbacks. Called at most once per bridge session.
    fn install_hooks(&self, hooks: Arc<dyn LifecycleHooks>);
}

/// An environment with a fixed title whose signals are raised by the host code.
#[derive(Default)]
pub struct StaticEnvironment {
    title: String,
    hooks: Mutex<Vec<Arc<dyn LifecycleHooks>>>,
}

impl StaticEnvironment {
    /// Creates an environment titled `title` with no hooks installed.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Number of installed hook sets.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Signals that the environment became visible again.
    pub fn resume(&self) {
        for hooks in self.snapshot() {
            hooks.resumed();
        }
    }

    /// Signals an in-page error. Returns true when every hook let it through.
    pub fn raise_error(&self) -> bool {
        self.snapshot()
            .iter()
            .fold(true, |propagate, hooks| hooks.runtime_error() && propagate)
    }

    // Hooks run outside the lock so they may call back into the environment.
    fn snapshot(&self) -> Vec<Arc<dyn LifecycleHooks>> {
        self.hooks.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

impl Environment for StaticEnvironment {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn install_hooks(&self, hooks: Arc<dyn LifecycleHooks>) {
        if let Ok(mut installed) = self.hooks.lock() {
            installed.push(hooks);
        }
    }
}

impl std::fmt::Debug for StaticEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticEnvironment")
            .field("title", &self.title)
            .field("hooks", &self.hook_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        resumed: AtomicUsize,
        handled: bool,
    }

    impl LifecycleHooks for Counting {
        fn resumed(&self) {
            self.resumed.fetch_add(1, Ordering::Relaxed);
        }

        fn runtime_error(&self) -> bool {
            !self.handled
        }
    }

    #[test]
    fn signals_reach_installed_hooks() {
        let env = StaticEnvironment::new("Counter");
        assert_eq!(env.title(), "Counter");
        assert!(env.raise_error());

        let hooks = Arc::new(Counting {
            resumed: AtomicUsize::new(0),
            handled: true,
        });
        env.install_hooks(hooks.clone());
        env.resume();
        env.resume();

        assert_eq!(hooks.resumed.load(Ordering::Relaxed), 2);
        assert!(!env.raise_error());
        assert_eq!(env.hook_count(), 1);
    }
}
