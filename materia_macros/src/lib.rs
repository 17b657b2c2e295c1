extern crate proc_macro;
use proc_macro::TokenStream;
use proc_macro2::{Ident, Span};

use quote::quote;
use syn::visit_mut::VisitMut;
use syn::{parse_macro_input, ImplItem, ItemImpl};

mod group_syntax;
use group_syntax::*;

mod search_replace;
use search_replace::*;

/// Expands an impl block once per dimension group.
///
/// Tensor operations come in one flavor per dimension group (dynamic,
/// intermediate, base, batch, static) and the bodies only differ by the
/// group they pass to the generic implementation. This macro takes a
/// template impl block and, for each group in the attribute sequence:
///
/// * replaces the `Each` identifier with the group's variant, so that
///   `Group::Each` resolves to e.g. `Group::Dynamic`;
/// * substitutes the substring `group` in every method name with the
///   lowercase group name, so that `group_reshape` becomes e.g.
///   `dynamic_reshape`. Bodies are not rewritten beyond the `Each`
///   placeholder, so they must not call their expanded siblings by the
///   template name.
///
/// # Example
///
/// ```ignore
/// #[expand_groups(Dynamic, Intmd, Base, Batch, Static)]
/// impl Tensor {
///     pub fn group_reshape(&self, shape: &[usize]) -> Result<Tensor> {
///         self.reshape_dims(Group::Each, shape)
///     }
/// }
/// ```
///
/// generates `dynamic_reshape`, `intmd_reshape`, `base_reshape`,
/// `batch_reshape` and `static_reshape`.
#[proc_macro_attribute]
pub fn expand_groups(attr: TokenStream, item: TokenStream) -> TokenStream {
    let group_sequence = parse_macro_input!(attr as GroupSequence);
    let item = parse_macro_input!(item as ItemImpl);

    let mut impl_blocks = Vec::new();

    for group in group_sequence.iter() {
        let mut impl_block = item.clone();
        let prefix = format!("{}", group).to_ascii_lowercase();

        // Visitor that replaces the `Each` placeholder with the group variant.
        let mut placeholder_visitor = FindReplaceIdent {
            find: Ident::new("Each", Span::call_site()),
            replace: group.clone(),
        };

        for impl_item in impl_block.items.iter_mut() {
            if let ImplItem::Method(method) = impl_item {
                let mut method_name = format!("{}", method.sig.ident);
                if let Some(position) = method_name.find("group") {
                    method_name.replace_range(position..position + 5, &prefix);
                    method.sig.ident = Ident::new(&method_name, Span::call_site());
                }

                placeholder_visitor.visit_block_mut(&mut method.block);
            }
        }

        impl_blocks.push(impl_block);
    }

    let result = quote! {
        #(#impl_blocks)*
    };
    result.into()
}
