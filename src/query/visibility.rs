//! Visibility Filter (spec §4.8): tracks which units are reachable from a
//! client's registered "main files" (its open documents/build targets) so
//! queries can be scoped to what the client actually has open, grounded on
//! `examples/original_source/lib/Index/FileVisibilityChecker.{h,cpp}`.
//!
//! Multiple callers can register overlapping main files (e.g. two open
//! editors pointing at files built by the same unit), so membership is
//! refcounted rather than a plain set.

use dashmap::DashMap;

use crate::kv::codes::IdCode;
use crate::kv::error::KvResult;
use crate::schema::unit_info::UnitInfo;
use crate::txns::read::ReadTransaction;

/// The two mutually exclusive ways a store can be scoped to "what the
/// client cares about" (spec §4.8). A store picks one for its lifetime;
/// mixing registration calls from both modes against the same filter would
/// make "visible" ambiguous, so callers (the client API layer) are expected
/// to only ever invoke the pair matching `Config::explicit_output_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityMode {
    /// Visibility tracks `registerMainFiles`/`unregisterMainFiles` calls
    /// against each unit's `main_file`.
    MainFile,
    /// Visibility tracks `addUnitOutFilePaths`/`removeUnitOutFilePaths`
    /// calls against each unit's `out_file` instead.
    ExplicitOutput,
}

pub struct VisibilityFilter {
    mode: VisibilityMode,
    main_file_refcounts: DashMap<IdCode, u32>,
    out_file_refcounts: DashMap<IdCode, u32>,
    unit_visibility_cache: DashMap<IdCode, bool>,
}

impl Default for VisibilityFilter {
    fn default() -> Self {
        Self::new(VisibilityMode::MainFile)
    }
}

impl VisibilityFilter {
    pub fn new(mode: VisibilityMode) -> Self {
        Self {
            mode,
            main_file_refcounts: DashMap::new(),
            out_file_refcounts: DashMap::new(),
            unit_visibility_cache: DashMap::new(),
        }
    }

    pub fn mode(&self) -> VisibilityMode {
        self.mode
    }

    pub fn register_main_files(&self, file_paths: &[String]) {
        for path in file_paths {
            let code = IdCode::from_str(path);
            *self.main_file_refcounts.entry(code).or_insert(0) += 1;
        }
        self.unit_visibility_cache.clear();
    }

    pub fn unregister_main_files(&self, file_paths: &[String]) {
        for path in file_paths {
            let code = IdCode::from_str(path);
            let mut remove = false;
            if let Some(mut count) = self.main_file_refcounts.get_mut(&code) {
                *count = count.saturating_sub(1);
                remove = *count == 0;
            }
            if remove {
                self.main_file_refcounts.remove(&code);
            }
        }
        self.unit_visibility_cache.clear();
    }

    /// Explicit-output counterpart to [`Self::register_main_files`]: tracks
    /// `out_file` paths directly, for stores that never have an editable
    /// main file to register (e.g. a build-output-driven client).
    pub fn add_unit_out_file_paths(&self, file_paths: &[String]) {
        for path in file_paths {
            let code = IdCode::from_str(path);
            *self.out_file_refcounts.entry(code).or_insert(0) += 1;
        }
        self.unit_visibility_cache.clear();
    }

    pub fn remove_unit_out_file_paths(&self, file_paths: &[String]) {
        for path in file_paths {
            let code = IdCode::from_str(path);
            let mut remove = false;
            if let Some(mut count) = self.out_file_refcounts.get_mut(&code) {
                *count = count.saturating_sub(1);
                remove = *count == 0;
            }
            if remove {
                self.out_file_refcounts.remove(&code);
            }
        }
        self.unit_visibility_cache.clear();
    }

    fn is_registered_main_file(&self, file: IdCode) -> bool {
        self.main_file_refcounts.contains_key(&file)
    }

    fn is_registered_out_file(&self, file: IdCode) -> bool {
        self.out_file_refcounts.contains_key(&file)
    }

    fn registrations_empty(&self) -> bool {
        match self.mode {
            VisibilityMode::MainFile => self.main_file_refcounts.is_empty(),
            VisibilityMode::ExplicitOutput => self.out_file_refcounts.is_empty(),
        }
    }

    fn unit_marks_visible(&self, unit: &UnitInfo) -> bool {
        match self.mode {
            VisibilityMode::MainFile => {
                unit.has_main_file() && self.is_registered_main_file(unit.main_file)
            }
            VisibilityMode::ExplicitOutput => {
                !unit.out_file.is_zero() && self.is_registered_out_file(unit.out_file)
            }
        }
    }

    /// A unit is visible if it, or any of its containment roots, carries the
    /// field the active mode tracks (main file or output file) as a
    /// registered path. An empty registration set means everything is
    /// visible (no filtering applied).
    pub fn is_unit_visible(&self, unit: &UnitInfo, txn: &ReadTransaction) -> KvResult<bool> {
        if self.registrations_empty() {
            return Ok(true);
        }
        if let Some(cached) = self.unit_visibility_cache.get(&unit.unit_code) {
            return Ok(*cached);
        }

        let mut visible = self.unit_marks_visible(unit);
        if !visible {
            txn.foreach_root_unit_of_unit(unit.unit_code, |root| {
                if self.unit_marks_visible(root) {
                    visible = true;
                }
                !visible
            })?;
        }

        self.unit_visibility_cache.insert(unit.unit_code, visible);
        Ok(visible)
    }
}
