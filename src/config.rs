//! Per-call configuration (spec §6, §9 "Global build configuration").
//!
//! The source this is modeled on reads process-level GUCs at engine
//! startup; we accept the same knobs as an explicit struct passed into
//! `build()`/`open_scan()` instead, so nothing here is process-wide state.

/// Format-selection override, used only by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceFormat {
    #[default]
    Auto,
    Plain,
    KeyRle,
    IncludeRle,
}

/// Fault-injection / coverage-probe knobs. None of these affect a release
/// build's behavior unless explicitly set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestConfig {
    pub force_format: ForceFormat,
    /// 0 = unlimited. Forces an early leaf seal so small inputs build tall trees.
    pub max_tuples_per_page: u32,
    pub max_internal_fanout: Option<u16>,
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub max_prefetch_depth: u16,
    pub parallel_chunk_pages: u16,
    pub page_size: usize,
    pub test: TestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_prefetch_depth: 8,
            parallel_chunk_pages: 8,
            page_size: 8192,
            test: TestConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(4096..=32768).contains(&self.page_size) {
            return Err(crate::error::Error::ResourceExceeded(format!(
                "page_size {} outside 4-32 KiB",
                self.page_size
            )));
        }
        Ok(())
    }
}
