use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Set when the user asks the process to stop.
///
/// The flag is checked between rounds; an in-flight request or tool call
/// always runs to completion first.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route Ctrl-C to a new flag. A second Ctrl-C exits immediately.
    pub fn install() -> anyhow::Result<Self> {
        let flag = Self::new();
        let handler_flag = flag.clone();
        ctrlc::set_handler(move || {
            if handler_flag.0.swap(true, Ordering::SeqCst) {
                warn!("Second interrupt, exiting without saving");
                std::process::exit(130);
            }
            warn!("Interrupt received, finishing the current step before stopping...");
        })?;
        Ok(flag)
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = InterruptFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_raised());
        flag.raise();
        assert!(observer.is_raised());
    }
}
