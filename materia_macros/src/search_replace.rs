use proc_macro2::Ident;
use syn::visit_mut::{self, VisitMut};

pub struct FindReplaceIdent {
    pub find: Ident,
    pub replace: Ident,
}

impl VisitMut for FindReplaceIdent {
    fn visit_ident_mut(&mut self, node: &mut Ident) {
        if *node == self.find {
            *node = self.replace.clone();
        }

        visit_mut::visit_ident_mut(self, node);
    }
}
