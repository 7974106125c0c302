// Session configuration
//
// The command-line glue lives outside this crate, but the knobs it exposes
// (heap size, stack limit, GC diagnostics, contract checking) shape the core,
// so parsing them is provided here.

use std::sync::Once;

use crate::interpreter::constants::{DEFAULT_HEAP_SIZE, DEFAULT_STACK_LIMIT};

/// Runtime options for one interpreter session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Heap size in slots, the null slot included
    pub heap_size: usize,
    /// Maximum call depth
    pub stack_limit: usize,
    /// Log every triggered collection at `info` instead of `debug`
    pub gc_trace: bool,
    /// Log the result of every collection at `info` instead of `debug`
    pub gc_summary: bool,
    /// Verify `free` calls and the rebuilt free list
    pub check_contracts: bool,
    /// Slide live objects together when a collection is not enough
    pub compaction: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heap_size: DEFAULT_HEAP_SIZE,
            stack_limit: DEFAULT_STACK_LIMIT,
            gc_trace: false,
            gc_summary: false,
            check_contracts: true,
            compaction: true,
        }
    }
}

impl Config {
    pub fn with_heap_size(mut self, heap_size: usize) -> Self {
        self.heap_size = heap_size;
        self
    }

    pub fn with_stack_limit(mut self, stack_limit: usize) -> Self {
        self.stack_limit = stack_limit;
        self
    }

    pub fn with_gc_trace(mut self, enabled: bool) -> Self {
        self.gc_trace = enabled;
        self
    }

    pub fn with_gc_summary(mut self, enabled: bool) -> Self {
        self.gc_summary = enabled;
        self
    }

    pub fn with_contracts(mut self, enabled: bool) -> Self {
        self.check_contracts = enabled;
        self
    }

    pub fn with_compaction(mut self, enabled: bool) -> Self {
        self.compaction = enabled;
        self
    }

    /// Consume the runtime flags from `args`, leaving everything else for the caller.
    ///
    /// ```text
    /// --heap-size <slots>    heap size (default 65536)
    /// --stack-limit <depth>  maximum call depth (default 1000)
    /// --gc-trace             report every triggered collection
    /// --gc-summary           report the result of every collection
    /// --no-contracts         skip free-list verification
    /// --no-compaction        treat exhaustion after a collection as fatal
    /// ```
    pub fn from_args(args: &mut pico_args::Arguments) -> Result<Self, pico_args::Error> {
        let defaults = Config::default();
        Ok(Config {
            heap_size: args
                .opt_value_from_str("--heap-size")?
                .unwrap_or(defaults.heap_size),
            stack_limit: args
                .opt_value_from_str("--stack-limit")?
                .unwrap_or(defaults.stack_limit),
            gc_trace: args.contains("--gc-trace"),
            gc_summary: args.contains("--gc-summary"),
            check_contracts: !args.contains("--no-contracts"),
            compaction: !args.contains("--no-compaction"),
        })
    }
}

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for diagnostic output.
///
/// Safe to call multiple times. Enable with `RUST_LOG=kestrel=debug`; GC
/// diagnostics requested through [`Config`] are emitted at `info`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(list: &[&str]) -> pico_args::Arguments {
        pico_args::Arguments::from_vec(list.iter().map(|s| std::ffi::OsString::from(*s)).collect())
    }

    #[test]
    fn test_defaults_without_flags() {
        let config = Config::from_args(&mut args(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.stack_limit, 1000);
    }

    #[test]
    fn test_flags_are_consumed() {
        let mut parsed = args(&[
            "--heap-size",
            "8",
            "--gc-summary",
            "--no-compaction",
            "script.ks",
        ]);
        let config = Config::from_args(&mut parsed).unwrap();
        assert_eq!(
            config,
            Config::default()
                .with_heap_size(8)
                .with_gc_summary(true)
                .with_compaction(false)
        );
        let rest: Vec<String> = parsed
            .finish()
            .into_iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect();
        assert_eq!(rest, vec!["script.ks".to_string()]);
    }

    #[test]
    fn test_bad_number_is_an_error() {
        assert!(Config::from_args(&mut args(&["--stack-limit", "deep"])).is_err());
    }
}
