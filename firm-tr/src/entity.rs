//! Named members of a type (spec §4.C "Entity").

use firm_types::Tarval;

use crate::ty::{AdditionalProperties, Peculiarity, TypeArena, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Automatic,
    Parameter,
    Dynamic,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variability {
    Uninitialized,
    Initialized,
    PartConstant,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Local,
    External,
}

/// One step of a compound-graph path: a field select or an array index
/// (spec §4.C "compound graph path").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Field(EntityId),
    Index(u64),
}

/// A structured initializer tree (spec §4.C: "kinds `const | tarval | null
/// | compound`"). `Const` addresses another entity (e.g. taking the
/// address of a global to initialize a function pointer field); `Tarval`
/// is a plain numeric/bit payload; `Null` zero-initializes; `Compound`
/// nests per-member initializers in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    Const(EntityId),
    Tarval(Tarval),
    Null,
    Compound(Vec<Initializer>),
}

/// The alternative, sparse representation: a flat list of
/// `(compound graph path, value)` pairs, used when only a few members of a
/// large aggregate are actually initialized (spec §4.C).
#[derive(Debug, Clone, PartialEq)]
pub struct PathInit {
    pub path: Vec<PathStep>,
    pub value: Initializer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompoundInit {
    Tree(Initializer),
    Sparse(Vec<PathInit>),
}

/// Opaque reference to a method entity's attached graph. `firm-ir` defines
/// what the index means (an index into its own graph table); this crate
/// only stores the slot so entity/graph ownership stays one-directional
/// (types below, graphs above).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphRef(pub u32);

#[derive(Debug, Clone)]
pub(crate) struct EntityData {
    pub(crate) name: String,
    pub(crate) owner: TypeId,
    pub(crate) ty: TypeId,
    pub(crate) allocation: Allocation,
    pub(crate) variability: Variability,
    pub(crate) volatile: bool,
    pub(crate) peculiarity: Peculiarity,
    pub(crate) offset_bits: i64,
    pub(crate) visibility: Visibility,
    pub(crate) graph: Option<GraphRef>,
    /// `None` means "inherited": fall back to the method type's default
    /// mask (spec §4.C "two-level lookup").
    pub(crate) own_properties: Option<AdditionalProperties>,
    pub(crate) init: Option<CompoundInit>,
    pub(crate) overwrites: Vec<EntityId>,
    pub(crate) overwritten_by: Vec<EntityId>,
}

pub struct EntityArena {
    pub(crate) entities: Vec<EntityData>,
}

impl EntityArena {
    pub fn new() -> Self {
        EntityArena {
            entities: Vec::new(),
        }
    }

    /// Creates `entity` and appends it to `owner`'s member list
    /// (`insert_entity_in_owner`, spec §4.C).
    pub fn new_entity(
        &mut self,
        types: &mut TypeArena,
        owner: TypeId,
        name: impl Into<String>,
        ty: TypeId,
    ) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(EntityData {
            name: name.into(),
            owner,
            ty,
            allocation: Allocation::Automatic,
            variability: Variability::Uninitialized,
            volatile: false,
            peculiarity: Peculiarity::Existent,
            offset_bits: -1,
            visibility: Visibility::Local,
            graph: None,
            own_properties: None,
            init: None,
            overwrites: Vec::new(),
            overwritten_by: Vec::new(),
        });
        types.add_member(owner, id);
        id
    }

    fn raw(&self, id: EntityId) -> &EntityData {
        &self.entities[id.0 as usize]
    }
    fn raw_mut(&mut self, id: EntityId) -> &mut EntityData {
        &mut self.entities[id.0 as usize]
    }

    pub fn name(&self, id: EntityId) -> &str {
        &self.raw(id).name
    }
    pub fn owner(&self, id: EntityId) -> TypeId {
        self.raw(id).owner
    }
    pub fn ty(&self, id: EntityId) -> TypeId {
        self.raw(id).ty
    }
    pub fn offset_bits(&self, id: EntityId) -> i64 {
        self.raw(id).offset_bits
    }
    pub fn set_offset_bits(&mut self, id: EntityId, offset: i64) {
        self.raw_mut(id).offset_bits = offset;
    }
    pub fn allocation(&self, id: EntityId) -> Allocation {
        self.raw(id).allocation
    }
    pub fn set_allocation(&mut self, id: EntityId, alloc: Allocation) {
        self.raw_mut(id).allocation = alloc;
    }
    pub fn variability(&self, id: EntityId) -> Variability {
        self.raw(id).variability
    }
    pub fn set_variability(&mut self, id: EntityId, v: Variability) {
        self.raw_mut(id).variability = v;
    }
    pub fn volatile(&self, id: EntityId) -> bool {
        self.raw(id).volatile
    }
    pub fn set_volatile(&mut self, id: EntityId, v: bool) {
        self.raw_mut(id).volatile = v;
    }
    pub fn peculiarity(&self, id: EntityId) -> Peculiarity {
        self.raw(id).peculiarity
    }
    pub fn visibility(&self, id: EntityId) -> Visibility {
        self.raw(id).visibility
    }
    pub fn set_visibility(&mut self, id: EntityId, v: Visibility) {
        self.raw_mut(id).visibility = v;
    }
    pub fn graph(&self, id: EntityId) -> Option<GraphRef> {
        self.raw(id).graph
    }
    pub fn set_graph(&mut self, id: EntityId, g: GraphRef) {
        self.raw_mut(id).graph = Some(g);
    }
    pub fn init(&self, id: EntityId) -> Option<&CompoundInit> {
        self.raw(id).init.as_ref()
    }
    pub fn set_init(&mut self, id: EntityId, init: CompoundInit) {
        self.raw_mut(id).init = Some(init);
    }

    pub fn set_own_properties(&mut self, id: EntityId, props: AdditionalProperties) {
        self.raw_mut(id).own_properties = Some(props);
    }

    /// Two-level property lookup (spec §4.C): the entity's own mask wins
    /// when set; otherwise fall back to the method type's default
    /// (`default_properties`).
    pub fn additional_properties(
        &self,
        types: &TypeArena,
        id: EntityId,
    ) -> AdditionalProperties {
        if let Some(own) = self.raw(id).own_properties {
            return own;
        }
        let ty = types.skip_tid(self.raw(id).ty);
        match types.kind(ty) {
            crate::ty::TypeKind::Method { properties, .. } => *properties,
            _ => AdditionalProperties::empty(),
        }
    }

    /// Registers `sub` as overriding `sup`, updating both sides atomically
    /// (spec §4.C: `add_entity_overwrites` and its inverse).
    pub fn add_entity_overwrites(&mut self, sup: EntityId, sub: EntityId) {
        self.raw_mut(sup).overwritten_by.push(sub);
        self.raw_mut(sub).overwrites.push(sup);
    }

    pub fn overwrites(&self, id: EntityId) -> &[EntityId] {
        &self.raw(id).overwrites
    }
    pub fn overwritten_by(&self, id: EntityId) -> &[EntityId] {
        &self.raw(id).overwritten_by
    }
}

impl Default for EntityArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{CallingConvention, LayoutState, TypeData, TypeKind};

    fn method_type(arena: &mut TypeArena, properties: AdditionalProperties) -> TypeId {
        arena.push(TypeData {
            name: "fn".into(),
            kind: TypeKind::Method {
                params: vec![],
                results: vec![],
                variadic: false,
                calling_convention: CallingConvention::C,
                properties,
            },
            mode: None,
            size_bits: 0,
            align_bits: 0,
            layout: LayoutState::Undefined,
        })
    }

    #[test]
    fn insert_entity_in_owner_appends() {
        let mut types = TypeArena::new();
        let owner = types.push(TypeData {
            name: "S".into(),
            kind: TypeKind::Struct { members: vec![] },
            mode: None,
            size_bits: 64,
            align_bits: 32,
            layout: LayoutState::Undefined,
        });
        let field_ty = types.push(TypeData {
            name: "int".into(),
            kind: TypeKind::Primitive,
            mode: Some(firm_types::mode::mode_Is),
            size_bits: 32,
            align_bits: 32,
            layout: LayoutState::Fixed,
        });
        let mut entities = EntityArena::new();
        let f = entities.new_entity(&mut types, owner, "x", field_ty);
        assert_eq!(types.members(owner), &[f]);
    }

    #[rstest::rstest]
    #[case(AdditionalProperties::PURE)]
    #[case(AdditionalProperties::CONST)]
    #[case(AdditionalProperties::NORETURN)]
    #[case(AdditionalProperties::PURE | AdditionalProperties::NOTHROW)]
    #[case(AdditionalProperties::empty())]
    fn additional_properties_fall_back_to_method_type(#[case] method_props: AdditionalProperties) {
        let mut types = TypeArena::new();
        let mt = method_type(&mut types, method_props);
        let global = types.push(TypeData {
            name: "glob".into(),
            kind: TypeKind::Struct { members: vec![] },
            mode: None,
            size_bits: 0,
            align_bits: 8,
            layout: LayoutState::Undefined,
        });
        let mut entities = EntityArena::new();
        let f = entities.new_entity(&mut types, global, "f", mt);
        assert_eq!(entities.additional_properties(&types, f), method_props);
    }

    #[test]
    fn own_properties_override_method_type_fallback() {
        let mut types = TypeArena::new();
        let mt = method_type(&mut types, AdditionalProperties::PURE);
        let global = types.push(TypeData {
            name: "glob".into(),
            kind: TypeKind::Struct { members: vec![] },
            mode: None,
            size_bits: 0,
            align_bits: 8,
            layout: LayoutState::Undefined,
        });
        let mut entities = EntityArena::new();
        let f = entities.new_entity(&mut types, global, "f", mt);
        entities.set_own_properties(f, AdditionalProperties::CONST);
        assert_eq!(
            entities.additional_properties(&types, f),
            AdditionalProperties::CONST
        );
    }

    #[test]
    fn overwrites_graph_is_bidirectional() {
        let mut types = TypeArena::new();
        let owner = types.push(TypeData {
            name: "C".into(),
            kind: TypeKind::Class {
                members: vec![],
                supertypes: vec![],
                subtypes: vec![],
                peculiarity: crate::ty::Peculiarity::Existent,
            },
            mode: None,
            size_bits: 0,
            align_bits: 8,
            layout: LayoutState::Undefined,
        });
        let mt = method_type(&mut types, AdditionalProperties::empty());
        let mut entities = EntityArena::new();
        let base_m = entities.new_entity(&mut types, owner, "m", mt);
        let derived_m = entities.new_entity(&mut types, owner, "m2", mt);
        entities.add_entity_overwrites(base_m, derived_m);
        assert_eq!(entities.overwritten_by(base_m), &[derived_m]);
        assert_eq!(entities.overwrites(derived_m), &[base_m]);
    }
}
