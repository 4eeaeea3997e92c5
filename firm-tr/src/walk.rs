//! Generic type/entity walker, grounded on `examples/original_source/ir/tr/typewalk.c`
//! (`type_walk`). Used internally by the lowering pass (spec §4.H) to
//! enumerate every entity of a type when computing bitfield masks; not
//! itself named by the distilled spec but implied by "every access funnels
//! through `skip_tid`" needing a way to reach every access in the first
//! place.

use std::collections::HashSet;

use crate::entity::EntityId;
use crate::ty::{TypeArena, TypeId, TypeKind};

/// Depth-first, pre-order walk over `root` and every type/entity reachable
/// from it through member and pointee edges. Each type is visited once.
pub fn type_walk(types: &TypeArena, root: TypeId, mut visit: impl FnMut(TypeId)) {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(t) = stack.pop() {
        let t = types.skip_tid(t);
        if !seen.insert(t) {
            continue;
        }
        visit(t);
        match types.kind(t) {
            TypeKind::Pointer { points_to } => stack.push(*points_to),
            TypeKind::Array { element, .. } => stack.push(*element),
            TypeKind::Method {
                params, results, ..
            } => {
                stack.extend(params.iter().copied());
                stack.extend(results.iter().copied());
            }
            TypeKind::Class { members, .. }
            | TypeKind::Struct { members }
            | TypeKind::Union { members } => {
                for m in members {
                    stack.push(*m);
                }
            }
            _ => {}
        }
    }
}

/// Same as [`type_walk`] but also yields every member entity found along
/// the way, mirroring `type_walk_irg`'s entity callback.
pub fn walk_entities(types: &TypeArena, root: TypeId, mut visit_entity: impl FnMut(EntityId)) {
    type_walk(types, root, |t| {
        for e in types.members(t) {
            visit_entity(*e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{LayoutState, TypeData};

    #[test]
    fn walk_visits_nested_struct_members_once() {
        let mut types = TypeArena::new();
        let inner_ty = types.push(TypeData {
            name: "inner".into(),
            kind: TypeKind::Primitive,
            mode: None,
            size_bits: 8,
            align_bits: 8,
            layout: LayoutState::Fixed,
        });
        let ptr = types.push(TypeData {
            name: "ptr".into(),
            kind: TypeKind::Pointer {
                points_to: inner_ty,
            },
            mode: None,
            size_bits: 64,
            align_bits: 64,
            layout: LayoutState::Fixed,
        });
        let mut visited = Vec::new();
        type_walk(&types, ptr, |t| visited.push(t));
        assert_eq!(visited, vec![ptr, inner_ty]);
    }
}
