use proc_macro2::Ident;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Result, Token};

/// A comma-separated sequence of dimension-group identifiers, e.g.
/// `Dynamic, Intmd, Base, Batch, Static`.
pub struct GroupSequence {
    groups: Punctuated<Ident, Token![,]>,
}

impl GroupSequence {
    pub fn iter(&self) -> impl Iterator<Item = &Ident> {
        self.groups.iter()
    }
}

impl Parse for GroupSequence {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(GroupSequence {
            groups: Punctuated::parse_terminated(input)?,
        })
    }
}
