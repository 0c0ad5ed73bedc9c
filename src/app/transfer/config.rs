//! Transfer engine configuration

use tracing::info;

use super::types::Strategy;
use crate::app::shell::SessionConfig;
use crate::constants::workers;
use crate::errors::{TransferError, TransferResult};

/// Settings for one transfer engine
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Number of pooled connections and worker threads
    pub parallel_degree: usize,
    /// Upper limit for `parallel_degree`
    pub max_parallel_degree: usize,
    /// Wire strategy for every connection
    pub strategy: Strategy,
    /// Shell settings for sink connections
    pub session: SessionConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            parallel_degree: workers::DEFAULT_PARALLEL_DEGREE,
            max_parallel_degree: workers::MAX_PARALLEL_DEGREE,
            strategy: Strategy::default(),
            session: SessionConfig::default(),
        }
    }
}

impl TransferConfig {
    /// Clamp the requested degree to the configured maximum
    pub fn with_parallel_degree(mut self, requested: usize) -> Self {
        let max = self.max_parallel_degree.min(workers::MAX_PARALLEL_DEGREE_LIMIT);
        if requested > max {
            info!(
                "Parallel degree was set to {}, which is more than max parallel degree = {}",
                requested, max
            );
            info!("Parallel degree has been downgraded to {}", max);
            self.parallel_degree = max;
        } else {
            info!("Parallel degree is {}", requested);
            self.parallel_degree = requested;
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> TransferResult<()> {
        if self.parallel_degree == 0 {
            return Err(TransferError::Configuration(
                "Parallel degree cannot be zero".to_string(),
            ));
        }
        if self.max_parallel_degree > workers::MAX_PARALLEL_DEGREE_LIMIT {
            return Err(TransferError::Configuration(format!(
                "Max parallel degree ({}) exceeds hard limit ({})",
                self.max_parallel_degree,
                workers::MAX_PARALLEL_DEGREE_LIMIT
            )));
        }
        if self.parallel_degree > self.max_parallel_degree {
            return Err(TransferError::Configuration(format!(
                "Parallel degree ({}) exceeds maximum ({})",
                self.parallel_degree, self.max_parallel_degree
            )));
        }
        if self.strategy == Strategy::Sftp && self.session.elevate_command.is_some() {
            return Err(TransferError::Configuration(
                "SFTP protocol doesn't support an elevated shell user, use the sink protocol"
                    .to_string(),
            ));
        }
        self.session
            .validate()
            .map_err(TransferError::Configuration)
    }
}
