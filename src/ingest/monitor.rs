//! Unit Monitor (spec §4.6): tracks whether a single unit has been made
//! stale by a change to one of its dependency files since it was last
//! imported, without re-reading the unit itself.
//!
//! Grounded on `UnitMonitor` in
//! `examples/original_source/lib/Index/IndexDatastore.cpp`: a unit starts
//! clean at its recorded mod-time; every trigger that reports a newer
//! mod-time than the unit's own is recorded (deduplicated by the *original*
//! file that started the chain, keeping only the most recent observation),
//! and the unit is considered out of date as long as any trigger remains
//! recorded. Re-importing the unit clears every trigger.
//!
//! A trigger observed several hops away through the unit-dependency graph
//! (spec §4.6, "dependency propagation") carries a wrapped description such
//! as `"unit(B) -> /x.c"` rather than the bare original file, so a caller can
//! tell not just that a unit is stale but which dependency chain caused it,
//! while still deduplicating on the one file that is ultimately responsible.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::kv::codes::IdCode;

/// One original file whose change made a unit stale (directly, or through a
/// chain of unit dependencies), and a human-readable description of that
/// chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfDateTrigger {
    pub original_file: String,
    pub description: String,
    pub out_of_date_mod_time_nanos: i64,
}

pub struct UnitMonitor {
    unit_code: IdCode,
    unit_name: String,
    mod_time_nanos: Mutex<i64>,
    triggers: Mutex<HashMap<String, OutOfDateTrigger>>,
}

impl UnitMonitor {
    pub fn new(unit_code: IdCode, unit_name: impl Into<String>, mod_time_nanos: i64) -> Self {
        Self {
            unit_code,
            unit_name: unit_name.into(),
            mod_time_nanos: Mutex::new(mod_time_nanos),
            triggers: Mutex::new(HashMap::new()),
        }
    }

    pub fn unit_code(&self) -> IdCode {
        self.unit_code
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn mod_time_nanos(&self) -> i64 {
        *self.mod_time_nanos.lock()
    }

    /// Records a fresh import: adopts the unit's new mod-time and drops
    /// every trigger that was pending (the reimport necessarily picked up
    /// whatever caused them).
    pub fn mark_reimported(&self, mod_time_nanos: i64) {
        *self.mod_time_nanos.lock() = mod_time_nanos;
        self.triggers.lock().clear();
    }

    pub fn is_out_of_date(&self) -> bool {
        !self.triggers.lock().is_empty()
    }

    pub fn out_of_date_triggers(&self) -> Vec<OutOfDateTrigger> {
        self.triggers.lock().values().cloned().collect()
    }

    /// Called when `original_file` (the file ultimately responsible,
    /// possibly several unit-dependency hops away) is observed with mod-time
    /// `out_of_date_mod_time_nanos`, described by `description` (the bare
    /// file path for a direct trigger, or a wrapped `"unit(U) -> ..."` chain
    /// for one propagated through a dependent). Marks the unit out of date
    /// only if that's newer than the unit's own recorded mod-time and newer
    /// than any prior observation of this same original file. Returns
    /// whether this call produced a new mark (the signal a caller uses to
    /// keep propagating the staleness to this unit's own dependents).
    pub fn check_for_out_of_date(
        &self,
        original_file: &str,
        description: &str,
        out_of_date_mod_time_nanos: i64,
    ) -> bool {
        if let Some(existing) = self.triggers.lock().get(original_file) {
            if existing.out_of_date_mod_time_nanos >= out_of_date_mod_time_nanos {
                return false;
            }
        }
        if self.mod_time_nanos() < out_of_date_mod_time_nanos {
            self.mark_out_of_date(original_file, description, out_of_date_mod_time_nanos)
        } else {
            false
        }
    }

    /// Unconditionally records `original_file` as an out-of-date cause,
    /// deduplicating against any earlier observation of the same file.
    /// Returns whether the recorded trigger actually changed.
    pub fn mark_out_of_date(
        &self,
        original_file: &str,
        description: &str,
        out_of_date_mod_time_nanos: i64,
    ) -> bool {
        let mut triggers = self.triggers.lock();
        let is_newer = match triggers.get(original_file) {
            Some(existing) => existing.out_of_date_mod_time_nanos < out_of_date_mod_time_nanos,
            None => true,
        };
        if is_newer {
            triggers.insert(
                original_file.to_string(),
                OutOfDateTrigger {
                    original_file: original_file.to_string(),
                    description: description.to_string(),
                    out_of_date_mod_time_nanos,
                },
            );
        }
        is_newer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> UnitMonitor {
        UnitMonitor::new(IdCode::from_str("u1"), "u1", 1_000)
    }

    #[test]
    fn trigger_older_than_unit_does_not_mark_out_of_date() {
        let m = monitor();
        assert!(!m.check_for_out_of_date("/a.h", "/a.h", 500));
        assert!(!m.is_out_of_date());
    }

    #[test]
    fn trigger_newer_than_unit_marks_out_of_date() {
        let m = monitor();
        assert!(m.check_for_out_of_date("/a.h", "/a.h", 2_000));
        assert!(m.is_out_of_date());
        assert_eq!(m.out_of_date_triggers().len(), 1);
    }

    #[test]
    fn repeated_trigger_with_same_or_older_time_is_not_renoted() {
        let m = monitor();
        assert!(m.check_for_out_of_date("/a.h", "/a.h", 2_000));
        assert!(!m.check_for_out_of_date("/a.h", "/a.h", 2_000));
        assert!(!m.check_for_out_of_date("/a.h", "/a.h", 1_500));
        assert_eq!(m.out_of_date_triggers().len(), 1);
    }

    #[test]
    fn wrapped_trigger_dedups_by_original_file_not_description() {
        let m = monitor();
        assert!(m.check_for_out_of_date("/a.h", "/a.h", 2_000));
        // Same original file, now described via a dependency chain, with a
        // later mod-time: replaces the direct trigger rather than stacking.
        assert!(m.check_for_out_of_date("/a.h", "unit(B) -> /a.h", 3_000));
        assert_eq!(m.out_of_date_triggers().len(), 1);
        assert_eq!(
            m.out_of_date_triggers()[0].description,
            "unit(B) -> /a.h"
        );
    }

    #[test]
    fn reimport_clears_all_triggers() {
        let m = monitor();
        m.check_for_out_of_date("/a.h", "/a.h", 2_000);
        m.mark_reimported(2_500);
        assert!(!m.is_out_of_date());
        assert_eq!(m.mod_time_nanos(), 2_500);
    }
}
