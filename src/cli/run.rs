use crate::cli::args::Selection;
use crate::common::config::{Config, DeleteMode};
use crate::executor::ExecutorOptions;
use crate::planner::{KeepSet, PlanOptions};
use crate::scanner::targets::RootTarget;
use crate::scanner::{self, ScanOptions};

/// Everything one scan/plan/execute cycle needs, with command-line
/// overrides already applied on top of the config file
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub roots: Vec<RootTarget>,
    pub keep: KeepSet,
    pub scan: ScanOptions,
    pub plan: PlanOptions,
    pub executor: ExecutorOptions,
    pub log_runs: bool,
}

impl RunConfig {
    pub fn new(config: &Config, selection: &Selection) -> Self {
        let effective = selection.apply(config);
        Self {
            roots: effective.roots.clone(),
            keep: effective.keep_set(),
            scan: ScanOptions::from_config(&effective),
            plan: PlanOptions::from_config(&effective),
            executor: ExecutorOptions::from_config(&effective, false),
            log_runs: effective.log_runs,
        }
    }

    /// Apply the `clean`-only switches
    pub fn for_clean(
        mut self,
        config: &Config,
        trash: bool,
        elevate: bool,
        strip: bool,
        no_log: bool,
    ) -> Self {
        self.executor = ExecutorOptions::from_config(config, elevate);
        if trash {
            self.executor.delete_mode = DeleteMode::Trash;
        }
        self.executor.strip |= strip;
        if no_log {
            self.log_runs = false;
        }
        self
    }
}

impl Selection {
    /// A copy of `config` with this selection's overrides applied
    pub fn apply(&self, config: &Config) -> Config {
        let mut effective = config.clone();

        if !self.roots.is_empty() {
            effective.roots = scanner::expand_paths(&self.roots)
                .into_iter()
                .map(RootTarget::new)
                .collect();
        }
        if let Some(langs) = &self.keep_lang {
            effective.keep_languages = langs.clone();
        }
        if let Some(layouts) = &self.keep_layout {
            effective.keep_layouts = layouts.clone();
        }
        if let Some(archs) = &self.keep_arch {
            effective.keep_architectures = archs.clone();
        }
        effective.collapse_regions |= self.collapse_regions;

        for root in &mut effective.roots {
            root.languages &= !self.no_languages;
            root.layouts &= !self.no_layouts;
            root.architectures &= !self.no_architectures;
        }

        effective
    }
}
