// Backpressure gate in front of the job table: a request that would add a row
// beyond the outstanding limit is turned away before anything is written.

use crate::error::QueueError;

#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    /// queued + retrying + running
    pub max_outstanding: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_outstanding: 500,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdmissionGuard {
    cfg: AdmissionConfig,
}

impl AdmissionGuard {
    pub fn new(cfg: AdmissionConfig) -> Self {
        Self { cfg }
    }

    pub fn check(&self, outstanding: usize) -> Result<(), QueueError> {
        if outstanding >= self.cfg.max_outstanding {
            tracing::warn!(
                outstanding,
                limit = self.cfg.max_outstanding,
                "admission denied: queue full"
            );
            return Err(QueueError::QueueFull {
                outstanding,
                limit: self.cfg.max_outstanding,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_below_limit_only() {
        let guard = AdmissionGuard::new(AdmissionConfig { max_outstanding: 2 });
        assert!(guard.check(0).is_ok());
        assert!(guard.check(1).is_ok());
        assert!(matches!(
            guard.check(2),
            Err(QueueError::QueueFull {
                outstanding: 2,
                limit: 2
            })
        ));
    }
}
