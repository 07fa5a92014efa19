//! A JSON-manifest-backed reference implementation of [`UnitRecordSource`]
//! and [`ArtifactReader`] (spec §4.7, "the query engine calls back into it to
//! resolve a provider/USR pair to concrete occurrences"). Stands in for a
//! real compiler-indexstore reader: units and provider records are ordinary
//! JSON files under a root directory, laid out as
//!
//! ```text
//! root/units.json          { "<unit_name>": "units/<file>.json", ... }
//! root/units/<file>.json   a `UnitRecord`, JSON-encoded
//! root/records/<name>.json the occurrences a provider named `<name>` declares
//! ```
//!
//! A provider's file stem is its provider name; `records/` is scanned once at
//! construction to build the name table `occurrences_for_usr` needs to go
//! from a provider's `IdCode` back to the file that holds its record.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::warn;

use crate::ingest::repository::{ProviderSymbol, UnitProviderDependency, UnitRecord, UnitRecordSource};
use crate::kv::codes::IdCode;
use crate::reader::{ArtifactReader, Location, Occurrence};
use crate::schema::roles::{SymbolKind, SymbolRole};
use crate::schema::unit_info::ProviderKind;

#[derive(Deserialize)]
struct UnitFile {
    mod_time_nanos: i64,
    main_file: Option<String>,
    out_file: Option<String>,
    sysroot: Option<String>,
    target: Option<String>,
    #[serde(default)]
    is_system: bool,
    #[serde(default)]
    provider_kind: ProviderKindFile,
    #[serde(default)]
    file_depends: Vec<String>,
    #[serde(default)]
    unit_depends: Vec<String>,
    #[serde(default)]
    provider_depends: Vec<ProviderDependencyFile>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum ProviderKindFile {
    #[default]
    Clang,
    Swift,
    Other,
}

impl From<ProviderKindFile> for ProviderKind {
    fn from(v: ProviderKindFile) -> Self {
        match v {
            ProviderKindFile::Clang => ProviderKind::Clang,
            ProviderKindFile::Swift => ProviderKind::Swift,
            ProviderKindFile::Other => ProviderKind::Other,
        }
    }
}

#[derive(Deserialize)]
struct ProviderDependencyFile {
    provider_name: String,
    file_path: String,
    module_name: String,
    #[serde(default)]
    is_system: bool,
}

#[derive(Deserialize)]
struct RecordFile {
    occurrences: Vec<OccurrenceFile>,
}

#[derive(Deserialize)]
struct OccurrenceFile {
    usr: String,
    symbol_name: String,
    kind: SymbolKindFile,
    #[serde(default)]
    is_unit_test: bool,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    related_roles: Vec<String>,
    file: String,
    line: u32,
    column: u32,
    #[serde(default)]
    related_usr: Option<String>,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum SymbolKindFile {
    Class,
    ObjcClass,
    ObjcCategory,
    ObjcProtocol,
    ObjcProperty,
    Struct,
    Protocol,
    Function,
    InstanceMethod,
    ClassMethod,
    GlobalVar,
    InstanceVar,
    TypeAlias,
    Enum,
    Union,
    TestClass,
    TestMethod,
    CommentTag,
    Other,
}

impl From<SymbolKindFile> for SymbolKind {
    fn from(v: SymbolKindFile) -> Self {
        match v {
            SymbolKindFile::Class => SymbolKind::Class,
            SymbolKindFile::ObjcClass => SymbolKind::ObjCClass,
            SymbolKindFile::ObjcCategory => SymbolKind::ObjCCategory,
            SymbolKindFile::ObjcProtocol => SymbolKind::ObjCProtocol,
            SymbolKindFile::ObjcProperty => SymbolKind::ObjCProperty,
            SymbolKindFile::Struct => SymbolKind::Struct,
            SymbolKindFile::Protocol => SymbolKind::Protocol,
            SymbolKindFile::Function => SymbolKind::Function,
            SymbolKindFile::InstanceMethod => SymbolKind::InstanceMethod,
            SymbolKindFile::ClassMethod => SymbolKind::ClassMethod,
            SymbolKindFile::GlobalVar => SymbolKind::GlobalVar,
            SymbolKindFile::InstanceVar => SymbolKind::InstanceVar,
            SymbolKindFile::TypeAlias => SymbolKind::TypeAlias,
            SymbolKindFile::Enum => SymbolKind::Enum,
            SymbolKindFile::Union => SymbolKind::Union,
            SymbolKindFile::TestClass => SymbolKind::TestClass,
            SymbolKindFile::TestMethod => SymbolKind::TestMethod,
            SymbolKindFile::CommentTag => SymbolKind::CommentTag,
            SymbolKindFile::Other => SymbolKind::Other,
        }
    }
}

fn parse_role(name: &str) -> Option<SymbolRole> {
    Some(match name {
        "declaration" => SymbolRole::DECLARATION,
        "definition" => SymbolRole::DEFINITION,
        "reference" => SymbolRole::REFERENCE,
        "read" => SymbolRole::READ,
        "write" => SymbolRole::WRITE,
        "call" => SymbolRole::CALL,
        "dynamic" => SymbolRole::DYNAMIC,
        "address_of" => SymbolRole::ADDRESS_OF,
        "implicit" => SymbolRole::IMPLICIT,
        "undefinition" => SymbolRole::UNDEFINITION,
        "rel_child_of" => SymbolRole::REL_CHILD_OF,
        "rel_base_of" => SymbolRole::REL_BASE_OF,
        "rel_override_of" => SymbolRole::REL_OVERRIDE_OF,
        "rel_received_by" => SymbolRole::REL_RECEIVED_BY,
        "rel_called_by" => SymbolRole::REL_CALLED_BY,
        "rel_extended_by" => SymbolRole::REL_EXTENDED_BY,
        "rel_accessor_of" => SymbolRole::REL_ACCESSOR_OF,
        "rel_contained_by" => SymbolRole::REL_CONTAINED_BY,
        "rel_specialization_of" => SymbolRole::REL_SPECIALIZATION_OF,
        other => {
            warn!(role = other, "unrecognized role name in manifest record, ignoring");
            return None;
        }
    })
}

fn parse_roles(names: &[String]) -> SymbolRole {
    names.iter().filter_map(|n| parse_role(n)).fold(SymbolRole::empty(), |acc, r| acc | r)
}

/// Reads units and provider records from JSON files under a root directory.
/// `root/units.json` maps unit names to the unit files under `root/units/`;
/// `root/records/<provider_name>.json` holds one provider's declared
/// occurrences, and the file's stem is taken as the provider's name.
pub struct ManifestSource {
    root: PathBuf,
    unit_index: HashMap<String, PathBuf>,
    provider_names: DashMap<IdCode, String>,
}

impl ManifestSource {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();

        let unit_index = fs::read(root.join("units.json"))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<HashMap<String, String>>(&bytes).ok())
            .map(|map| map.into_iter().map(|(k, v)| (k, root.join(v))).collect())
            .unwrap_or_default();

        let provider_names = DashMap::new();
        if let Ok(entries) = fs::read_dir(root.join("records")) {
            for entry in entries.flatten() {
                if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                    provider_names.insert(IdCode::from_str(stem), stem.to_string());
                }
            }
        }

        Self { root, unit_index, provider_names }
    }

    /// Every unit name `units.json` names, in no particular order. Used by
    /// the ingest bootstrap to drive an initial full scan.
    pub fn unit_names(&self) -> Vec<String> {
        self.unit_index.keys().cloned().collect()
    }

    fn read_unit_file(&self, unit_name: &str) -> Option<UnitFile> {
        let path = self.unit_index.get(unit_name)?;
        let bytes = fs::read(path)
            .map_err(|err| warn!(unit = unit_name, %err, "failed to read unit manifest file"))
            .ok()?;
        serde_json::from_slice(&bytes)
            .map_err(|err| warn!(unit = unit_name, %err, "failed to parse unit manifest file"))
            .ok()
    }

    fn record_path(&self, provider_name: &str) -> PathBuf {
        self.root.join("records").join(format!("{provider_name}.json"))
    }

    fn read_record_file(&self, provider_name: &str) -> Option<RecordFile> {
        let path = self.record_path(provider_name);
        let bytes = fs::read(&path).ok()?;
        serde_json::from_slice(&bytes)
            .map_err(|err| warn!(provider = provider_name, %err, "failed to parse provider record file"))
            .ok()
    }
}

impl UnitRecordSource for ManifestSource {
    fn mod_time_nanos(&self, unit_name: &str) -> Option<i64> {
        let path = self.unit_index.get(unit_name)?;
        if !Path::new(path).exists() {
            return None;
        }
        self.read_unit_file(unit_name).map(|u| u.mod_time_nanos)
    }

    fn read_unit(&self, unit_name: &str) -> Option<UnitRecord> {
        let file = self.read_unit_file(unit_name)?;
        Some(UnitRecord {
            mod_time_nanos: file.mod_time_nanos,
            main_file: file.main_file,
            out_file: file.out_file,
            sysroot: file.sysroot,
            target: file.target,
            is_system: file.is_system,
            provider_kind: file.provider_kind.into(),
            file_depends: file.file_depends,
            unit_depends: file.unit_depends,
            provider_depends: file
                .provider_depends
                .into_iter()
                .map(|d| UnitProviderDependency {
                    provider_name: d.provider_name,
                    file_path: d.file_path,
                    module_name: d.module_name,
                    is_system: d.is_system,
                })
                .collect(),
        })
    }

    fn read_provider_symbols(&self, provider_name: &str) -> Vec<ProviderSymbol> {
        self.provider_names
            .entry(IdCode::from_str(provider_name))
            .or_insert_with(|| provider_name.to_string());

        let Some(record) = self.read_record_file(provider_name) else {
            return Vec::new();
        };
        record
            .occurrences
            .into_iter()
            .map(|occ| ProviderSymbol {
                usr: occ.usr,
                symbol_name: occ.symbol_name,
                kind: occ.kind.into(),
                is_unit_test: occ.is_unit_test,
                roles: parse_roles(&occ.roles),
                related_roles: parse_roles(&occ.related_roles),
            })
            .collect()
    }
}

impl ArtifactReader for ManifestSource {
    fn occurrences_for_usr(&self, provider: IdCode, usr_code: IdCode) -> Vec<Occurrence> {
        let Some(provider_name) = self.provider_names.get(&provider).map(|e| e.clone()) else {
            return Vec::new();
        };
        let Some(record) = self.read_record_file(&provider_name) else {
            return Vec::new();
        };

        record
            .occurrences
            .into_iter()
            .filter(|occ| IdCode::from_str(&occ.usr) == usr_code)
            .map(|occ| Occurrence {
                usr: occ.usr,
                symbol_name: occ.symbol_name,
                kind: occ.kind.into(),
                roles: parse_roles(&occ.roles),
                related_roles: parse_roles(&occ.related_roles),
                location: Location { file: IdCode::from_str(&occ.file), line: occ.line, column: occ.column },
                related_usr: occ.related_usr,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn sample_root() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        write(
            &tmp.path().join("units.json"),
            r#"{"/proj/a.unit": "units/a.json"}"#,
        );
        write(
            &tmp.path().join("units/a.json"),
            r#"{
                "mod_time_nanos": 1000,
                "main_file": "/proj/a.cpp",
                "out_file": "/proj/a.o",
                "sysroot": null,
                "target": "x86_64-apple-macosx",
                "is_system": false,
                "provider_kind": "clang",
                "file_depends": ["/proj/a.cpp", "/proj/a.h"],
                "unit_depends": [],
                "provider_depends": [
                    {"provider_name": "p1", "file_path": "/proj/a.cpp", "module_name": ""}
                ]
            }"#,
        );
        write(
            &tmp.path().join("records/p1.json"),
            r#"{
                "occurrences": [
                    {
                        "usr": "u/foo",
                        "symbol_name": "foo",
                        "kind": "function",
                        "roles": ["declaration", "definition"],
                        "file": "/proj/a.cpp",
                        "line": 10,
                        "column": 1
                    }
                ]
            }"#,
        );
        tmp
    }

    #[test]
    fn reads_a_unit_record_by_name() {
        let tmp = sample_root();
        let source = ManifestSource::open(tmp.path());

        assert_eq!(source.mod_time_nanos("/proj/a.unit"), Some(1000));
        let unit = source.read_unit("/proj/a.unit").unwrap();
        assert_eq!(unit.main_file.as_deref(), Some("/proj/a.cpp"));
        assert_eq!(unit.provider_depends.len(), 1);
        assert_eq!(unit.provider_depends[0].provider_name, "p1");
    }

    #[test]
    fn unknown_unit_has_no_mod_time() {
        let tmp = sample_root();
        let source = ManifestSource::open(tmp.path());
        assert_eq!(source.mod_time_nanos("/proj/missing.unit"), None);
    }

    #[test]
    fn reads_provider_symbols_with_roles_decoded() {
        let tmp = sample_root();
        let source = ManifestSource::open(tmp.path());
        let symbols = source.read_provider_symbols("p1");
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].usr, "u/foo");
        assert!(symbols[0].roles.contains(SymbolRole::DEFINITION));
    }

    #[test]
    fn occurrences_for_usr_resolves_through_the_scanned_provider_table() {
        let tmp = sample_root();
        let source = ManifestSource::open(tmp.path());
        let provider_code = IdCode::from_str("p1");
        let usr_code = IdCode::from_str("u/foo");

        let occs = source.occurrences_for_usr(provider_code, usr_code);
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].symbol_name, "foo");
        assert_eq!(occs[0].location.line, 10);
    }

    #[test]
    fn occurrences_for_unknown_provider_code_is_empty() {
        let tmp = sample_root();
        let source = ManifestSource::open(tmp.path());
        let occs = source.occurrences_for_usr(IdCode::from_str("no-such-provider"), IdCode::from_str("u/foo"));
        assert!(occs.is_empty());
    }
}
