//! Type & entity model (spec §4.C).
//!
//! Types and entities are process-global and immutable once their layout
//! is fixed, but need a construction phase beforehand, so unlike
//! `firm-types`'s mode registry they're not backed by a lazily-built
//! static: a [`Program`] owns one [`ty::TypeArena`] and one
//! [`entity::EntityArena`] for the whole process lifetime (spec §3
//! "Lifecycles": "Modes, types, and entities live for the whole process").

pub mod entity;
pub mod error;
pub mod ty;
pub mod walk;

pub use entity::{Allocation, CompoundInit, EntityArena, EntityId, GraphRef, Initializer, PathStep, Variability, Visibility};
pub use ty::{AdditionalProperties, ArrayDim, CallingConvention, LayoutState, Peculiarity, TypeArena, TypeId, TypeKind};

/// Owns every type and entity created during this process's lifetime.
pub struct Program {
    pub types: TypeArena,
    pub entities: EntityArena,
    /// The global type (spec §6 `init`: "types module registers
    /// `glob_type`").
    pub glob_type: TypeId,
    /// Thread-local-storage segment type.
    pub tls_type: TypeId,
}

impl Program {
    pub fn new() -> Self {
        let mut types = TypeArena::new();
        let glob_type = types.push(ty::TypeData {
            name: "$glob".into(),
            kind: TypeKind::Struct { members: vec![] },
            mode: None,
            size_bits: 0,
            align_bits: 8,
            layout: LayoutState::Undefined,
        });
        let tls_type = types.push(ty::TypeData {
            name: "$tls".into(),
            kind: TypeKind::Struct { members: vec![] },
            mode: None,
            size_bits: 0,
            align_bits: 8,
            layout: LayoutState::Undefined,
        });
        Program {
            types,
            entities: EntityArena::new(),
            glob_type,
            tls_type,
        }
    }

    pub fn new_entity(&mut self, owner: TypeId, name: impl Into<String>, ty: TypeId) -> EntityId {
        self.entities.new_entity(&mut self.types, owner, name, ty)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_starts_with_global_and_tls_types() {
        let prog = Program::new();
        assert_eq!(prog.types.name(prog.glob_type), "$glob");
        assert_eq!(prog.types.name(prog.tls_type), "$tls");
    }
}
