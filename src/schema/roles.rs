//! Symbol role and kind bitsets.
//!
//! Role bits are a 64-bit occurrence of the language-entity's role at one
//! source location (`providers-by-usr`'s `Roles`/`RelatedRoles` fields, spec
//! §4.2 table 1). `GlobalSymbolKind` numbering is taken verbatim from
//! `examples/original_source/lib/Database/DatabaseImpl.h` so the on-disk
//! encoding matches a real, previously-shipped assignment.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// A symbol occurrence's role(s) at a single source location, or (via
    /// the `Relation*` bits) its relation to another symbol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SymbolRole: u64 {
        const DECLARATION       = 1 << 0;
        const DEFINITION        = 1 << 1;
        const REFERENCE         = 1 << 2;
        const READ              = 1 << 3;
        const WRITE             = 1 << 4;
        const CALL              = 1 << 5;
        const DYNAMIC           = 1 << 6;
        const ADDRESS_OF        = 1 << 7;
        const IMPLICIT          = 1 << 8;
        const UNDEFINITION      = 1 << 9;

        const REL_CHILD_OF        = 1 << 16;
        const REL_BASE_OF         = 1 << 17;
        const REL_OVERRIDE_OF     = 1 << 18;
        const REL_RECEIVED_BY     = 1 << 19;
        const REL_CALLED_BY       = 1 << 20;
        const REL_EXTENDED_BY     = 1 << 21;
        const REL_ACCESSOR_OF     = 1 << 22;
        const REL_CONTAINED_BY    = 1 << 23;
        const REL_SPECIALIZATION_OF = 1 << 24;

        /// Canonical-occurrence role; a definition is always canonical, and a
        /// declaration is promoted to canonical for kinds where
        /// [`prefers_declaration_as_canonical`] holds (spec §4.7).
        const CANONICAL          = 1 << 32;
    }
}

impl SymbolRole {
    pub fn is_canonical_candidate(self) -> bool {
        self.contains(SymbolRole::DEFINITION) || self.contains(SymbolRole::CANONICAL)
    }
}

/// Coarse language-entity kind, as decoded from the external artifact reader.
/// Only the subset relevant to [`GlobalSymbolKind`] bucketing and the
/// canonical-occurrence rule needs naming here; fine-grained kind strings (if
/// any) are the artifact reader's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Class,
    ObjCClass,
    ObjCCategory,
    ObjCProtocol,
    ObjCProperty,
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

impl SymbolKind {
    /// For ObjC classes/categories/protocols/properties the declaration is a
    /// better navigation target than any definition (spec glossary,
    /// "Canonical occurrence"; spec §4.7).
    pub fn prefers_declaration_as_canonical(self) -> bool {
        matches!(
            self,
            SymbolKind::ObjCClass
                | SymbolKind::ObjCCategory
                | SymbolKind::ObjCProtocol
                | SymbolKind::ObjCProperty
        )
    }

    pub fn is_instance_method(self) -> bool {
        matches!(self, SymbolKind::InstanceMethod)
    }

    pub fn is_class_like(self) -> bool {
        matches!(
            self,
            SymbolKind::Class | SymbolKind::ObjCClass | SymbolKind::Struct | SymbolKind::Protocol
        )
    }

    pub fn is_extension_like(self) -> bool {
        matches!(self, SymbolKind::ObjCCategory)
    }
}

/// Coarse kind bucket used for `usrs-by-global-kind` enumeration (spec §4.2
/// table 5). Numeric values match
/// `examples/original_source/lib/Database/DatabaseImpl.h`'s `GlobalSymbolKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum GlobalSymbolKind {
    Class = 1,
    Protocol = 2,
    Function = 3,
    Struct = 4,
    Union = 5,
    Enum = 6,
    Type = 7,
    GlobalVar = 8,
    TestClassOrExtension = 9,
    TestMethod = 10,
    CommentTag = 11,
}

impl GlobalSymbolKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => GlobalSymbolKind::Class,
            2 => GlobalSymbolKind::Protocol,
            3 => GlobalSymbolKind::Function,
            4 => GlobalSymbolKind::Struct,
            5 => GlobalSymbolKind::Union,
            6 => GlobalSymbolKind::Enum,
            7 => GlobalSymbolKind::Type,
            8 => GlobalSymbolKind::GlobalVar,
            9 => GlobalSymbolKind::TestClassOrExtension,
            10 => GlobalSymbolKind::TestMethod,
            11 => GlobalSymbolKind::CommentTag,
            _ => return None,
        })
    }
}

/// Maps a decoded symbol kind to its coarse bucket, or `None` if the kind has
/// no global-search bucket (spec §4.4, `add_symbol_info`).
pub fn global_symbol_kind(kind: SymbolKind) -> Option<GlobalSymbolKind> {
    match kind {
        SymbolKind::Class | SymbolKind::ObjCClass | SymbolKind::ObjCCategory => {
            Some(GlobalSymbolKind::Class)
        }
        SymbolKind::Protocol | SymbolKind::ObjCProtocol => Some(GlobalSymbolKind::Protocol),
        SymbolKind::Function | SymbolKind::InstanceMethod | SymbolKind::ClassMethod => {
            Some(GlobalSymbolKind::Function)
        }
        SymbolKind::Struct => Some(GlobalSymbolKind::Struct),
        SymbolKind::Union => Some(GlobalSymbolKind::Union),
        SymbolKind::Enum => Some(GlobalSymbolKind::Enum),
        SymbolKind::TypeAlias => Some(GlobalSymbolKind::Type),
        SymbolKind::GlobalVar | SymbolKind::InstanceVar | SymbolKind::ObjCProperty => {
            Some(GlobalSymbolKind::GlobalVar)
        }
        SymbolKind::TestClass => Some(GlobalSymbolKind::TestClassOrExtension),
        SymbolKind::TestMethod => Some(GlobalSymbolKind::TestMethod),
        SymbolKind::CommentTag => Some(GlobalSymbolKind::CommentTag),
        SymbolKind::Other => None,
    }
}
