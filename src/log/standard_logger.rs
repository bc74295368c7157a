use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::runtime::ConfigBuilder;
use log4rs::config::{Appender, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Config;

#[cfg(feature = "progress_bar")]
use super::progress_bar_encoder::PBWrapperEncoder;
use crate::error::TbError;
use crate::log::{LogConfiguration, ModuleLogConfiguration};

// ISO 8601 timestamp, color coded level, then the module the message came from.
const DEFAULT_LOG_PATTERN: &str = "{d(%Y-%m-%dT%H:%M:%SZ)} {h({l})} {t} - {m}{n}";

impl From<&ModuleLogConfiguration> for Logger {
    fn from(module_config: &ModuleLogConfiguration) -> Self {
        Logger::builder().build(module_config.module.clone(), module_config.level)
    }
}

impl LogConfiguration {
    /// Installs or reconfigures the `log4rs` logger to match this configuration. Messages go to
    /// stderr so that they never mix with results printed on stdout.
    pub(in crate::log) fn set_config(&mut self) -> Result<(), TbError> {
        let encoder = Box::new(PatternEncoder::new(DEFAULT_LOG_PATTERN));
        #[cfg(feature = "progress_bar")]
        let encoder = Box::new(PBWrapperEncoder::new(encoder));
        let stderr = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(encoder)
            .build();
        let mut config: ConfigBuilder =
            Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));

        for module_config in self.module_configurations.values() {
            config = config.logger(module_config.into());
        }

        let root = Root::builder()
            .appender("stderr")
            .build(self.global_log_level);
        let new_config = config.build(root).map_err(|e| {
            TbError::ConfigurationError(format!("failed to build logging config: {e}"))
        })?;

        match self.root_handle {
            Some(ref mut handle) => handle.set_config(new_config),
            None => {
                let handle = log4rs::init_config(new_config).map_err(|e| {
                    TbError::ConfigurationError(format!("failed to install logger: {e}"))
                })?;
                self.root_handle = Some(handle);
            }
        }
        Ok(())
    }
}
