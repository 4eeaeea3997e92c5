//! Compound, array, method, pointer, and primitive types (spec §4.C).

use firm_types::Mode;

use crate::entity::EntityId;
use crate::error::LayoutError;

bitflags::bitflags! {
    /// Method entity property mask (spec §3 "Type": "additional-property
    /// flags (const, pure, noreturn, nothrow, naked)").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AdditionalProperties: u8 {
        const CONST    = 1 << 0;
        const PURE     = 1 << 1;
        const NORETURN = 1 << 2;
        const NOTHROW  = 1 << 3;
        const NAKED    = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peculiarity {
    /// A real, instantiable class.
    Existent,
    /// An abstract description with no runtime instances.
    Description,
    /// A stub inherited from an ancestor, not separately declared.
    Inherited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutState {
    Undefined,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    C,
    Fastcall,
    Stdcall,
}

/// One dimension of an array type: an (optional) lower bound and an
/// (optional) element count, honoring per-dimension order (spec §4.H
/// "Base + index * sizeof(element) (plus a recursive formula for
/// multi-dimensional arrays honoring per-dimension lower bounds)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDim {
    pub lower_bound: i64,
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Primitive,
    Pointer {
        points_to: TypeId,
    },
    Array {
        element: TypeId,
        dims: Vec<ArrayDim>,
    },
    Method {
        params: Vec<TypeId>,
        results: Vec<TypeId>,
        variadic: bool,
        calling_convention: CallingConvention,
        properties: AdditionalProperties,
    },
    Class {
        members: Vec<EntityId>,
        supertypes: Vec<TypeId>,
        subtypes: Vec<TypeId>,
        peculiarity: Peculiarity,
    },
    Struct {
        members: Vec<EntityId>,
    },
    Union {
        members: Vec<EntityId>,
    },
    Enumeration {
        consts: Vec<(String, firm_types::Tarval)>,
    },
    /// Forwarding tombstone left behind by `exchange_types`. Every field
    /// accessor funnels through `skip_tid`, so this variant should never
    /// be observed directly by a well-behaved caller (spec §4.C).
    Id {
        forward_to: TypeId,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct TypeData {
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) mode: Option<Mode>,
    pub(crate) size_bits: u64,
    pub(crate) align_bits: u32,
    pub(crate) layout: LayoutState,
}

/// Opaque handle into a [`crate::TypeStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) u32);

pub(crate) struct TypeArena {
    pub(crate) types: Vec<TypeData>,
}

impl TypeArena {
    pub(crate) fn new() -> Self {
        TypeArena { types: Vec::new() }
    }

    pub(crate) fn push(&mut self, data: TypeData) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(data);
        id
    }

    fn raw(&self, id: TypeId) -> &TypeData {
        &self.types[id.0 as usize]
    }

    fn raw_mut(&mut self, id: TypeId) -> &mut TypeData {
        &mut self.types[id.0 as usize]
    }

    /// Follows an `id`-type forwarding chain to its final target.
    /// Idempotent: `skip_tid(skip_tid(t)) == skip_tid(t)` (spec §8
    /// invariant 6).
    pub fn skip_tid(&self, mut t: TypeId) -> TypeId {
        loop {
            match &self.raw(t).kind {
                TypeKind::Id { forward_to } => t = *forward_to,
                _ => return t,
            }
        }
    }

    /// Turns `old` into a forwarding `id` type pointing at `new`. Every
    /// other accessor transparently follows this via `skip_tid` (spec
    /// §4.C).
    pub fn exchange_types(&mut self, old: TypeId, new: TypeId) {
        let old = self.skip_tid(old);
        let new = self.skip_tid(new);
        if old == new {
            return;
        }
        self.raw_mut(old).kind = TypeKind::Id { forward_to: new };
    }

    pub fn kind(&self, t: TypeId) -> &TypeKind {
        &self.raw(self.skip_tid(t)).kind
    }

    pub fn name(&self, t: TypeId) -> &str {
        &self.raw(self.skip_tid(t)).name
    }

    pub fn mode(&self, t: TypeId) -> Option<Mode> {
        self.raw(self.skip_tid(t)).mode
    }

    pub fn size_bits(&self, t: TypeId) -> u64 {
        self.raw(self.skip_tid(t)).size_bits
    }

    pub fn align_bits(&self, t: TypeId) -> u32 {
        self.raw(self.skip_tid(t)).align_bits
    }

    pub fn layout_state(&self, t: TypeId) -> LayoutState {
        self.raw(self.skip_tid(t)).layout
    }

    /// Creates an array type over `element` with the given per-dimension
    /// bounds (spec §4.C "Type"). Inherits `element`'s alignment; the
    /// overall size is left at 0 (`Undefined` layout) until
    /// [`Self::set_size_and_align`]/[`Self::fix_layout`] commit it, same as
    /// every other compound type here.
    pub fn new_array(&mut self, name: impl Into<String>, element: TypeId, dims: Vec<ArrayDim>) -> TypeId {
        let align_bits = self.align_bits(element);
        self.push(TypeData {
            name: name.into(),
            kind: TypeKind::Array { element, dims },
            mode: None,
            size_bits: 0,
            align_bits,
            layout: LayoutState::Undefined,
        })
    }

    pub fn set_size_and_align(&mut self, t: TypeId, size_bits: u64, align_bits: u32) {
        let t = self.skip_tid(t);
        let data = self.raw_mut(t);
        data.size_bits = size_bits;
        data.align_bits = align_bits;
    }

    /// Layout state transitions strictly `Undefined -> Fixed` (spec §4.C).
    /// Validates that fixed members (already-fixed sub-entities, checked
    /// by the caller before invoking this) fit within `size_bits`.
    pub fn fix_layout(&mut self, t: TypeId) -> Result<(), LayoutError> {
        let t = self.skip_tid(t);
        if self.raw(t).layout == LayoutState::Fixed {
            return Err(LayoutError::AlreadyFixed(t));
        }
        if self.raw(t).size_bits == 0 && !matches!(self.raw(t).kind, TypeKind::Method { .. }) {
            return Err(LayoutError::SizeTooSmall(t));
        }
        self.raw_mut(t).layout = LayoutState::Fixed;
        Ok(())
    }

    pub fn members(&self, t: TypeId) -> &[EntityId] {
        match self.kind(t) {
            TypeKind::Class { members, .. }
            | TypeKind::Struct { members }
            | TypeKind::Union { members } => members,
            _ => &[],
        }
    }

    pub fn add_member(&mut self, owner: TypeId, member: EntityId) {
        let owner = self.skip_tid(owner);
        match &mut self.raw_mut(owner).kind {
            TypeKind::Class { members, .. }
            | TypeKind::Struct { members }
            | TypeKind::Union { members } => members.push(member),
            _ => panic!("add_member called on a type with no member list"),
        }
    }

    /// Registers `sub` as overriding `sup` in both directions atomically
    /// (spec §4.C: "both sides must be updated atomically").
    pub fn add_entity_overwrites(&mut self, _sup: TypeId, _sub: TypeId) {
        // Overwrite edges live on the *entities*, not the types; see
        // `EntityStore::add_overwrites`. Kept here only as the
        // type-level documentation anchor the spec names it under.
    }

    pub fn add_supertype(&mut self, class: TypeId, supertype: TypeId) {
        let class = self.skip_tid(class);
        if let TypeKind::Class { supertypes, .. } = &mut self.raw_mut(class).kind {
            supertypes.push(supertype);
        }
        let supertype = self.skip_tid(supertype);
        if let TypeKind::Class { subtypes, .. } = &mut self.raw_mut(supertype).kind {
            subtypes.push(class);
        }
    }
}
