//! Stands in for the console logger when the `logging` feature is off. Messages are discarded,
//! but the configuration API keeps working.

use crate::error::TbError;
use crate::log::LogConfiguration;

impl LogConfiguration {
    pub(in crate::log) fn set_config(&mut self) -> Result<(), TbError> {
        log::set_max_level(self.global_log_level);
        Ok(())
    }
}
