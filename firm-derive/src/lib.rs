//! Derives the empty-default arms of the local optimizer's three-stage
//! model (spec §4.F, design note §9: "a derive macro can generate the
//! empty-default arms").
//!
//! Most opcodes implement none of `ComputedValue`/`EquivalentNode`/
//! `TransformNode` — they only ever get folded as an *operand* of some
//! other node's rule, never rewritten themselves (`Start`, `Block`-unrelated
//! control nodes, `Call`, …). Rather than hand-writing three trivial
//! `Option::None`-returning impls per such opcode marker type, those
//! markers derive [`NoOptStage`].

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Implements `firm_ir::opt::local::{ComputedValue, EquivalentNode,
/// TransformNode}` as pure no-ops (`fn ... (&self, ...) -> Option<_> { None
/// }`) for the annotated marker type.
#[proc_macro_derive(NoOptStage)]
pub fn derive_no_opt_stage(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics crate::opt::local::ComputedValue for #name #ty_generics #where_clause {
            fn computed_value(
                &self,
                _node: crate::node::NodeId,
                _graph: &crate::graph::IrGraph,
                _prog: &firm_tr::Program,
            ) -> Option<firm_types::Tarval> {
                None
            }
        }

        impl #impl_generics crate::opt::local::EquivalentNode for #name #ty_generics #where_clause {
            fn equivalent_node(
                &self,
                _node: crate::node::NodeId,
                _graph: &crate::graph::IrGraph,
            ) -> Option<crate::node::NodeId> {
                None
            }
        }

        impl #impl_generics crate::opt::local::TransformNode for #name #ty_generics #where_clause {
            fn transform_node(
                &self,
                _node: crate::node::NodeId,
                _graph: &mut crate::graph::IrGraph,
            ) -> Option<crate::node::NodeId> {
                None
            }
        }
    };

    expanded.into()
}
