//! Derive macro for the `Stackable` trait.
//!
//! Generates an implementation that batches a struct field by field: every
//! field type must itself be `Stackable<Output = Self>`. The trait has to be
//! in scope where the derive is used.
//!
//! # Example
//!
//! ```ignore
//! use study_ml::dataset::Stackable;
//! use study_ml::ml::Tensor;
//!
//! #[derive(Stackable)]
//! struct Sample {
//!     x: Tensor,
//!     y: Tensor,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields, Index};

#[proc_macro_derive(Stackable)]
pub fn derive_stackable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let data = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Stackable can only be derived for structs",
            ))
        }
    };

    let field_types: Vec<_> = data.fields.iter().map(|f| &f.ty).collect();
    if field_types.is_empty() {
        return Err(syn::Error::new_spanned(
            name,
            "Stackable needs at least one field",
        ));
    }
    let vec_names: Vec<_> = (0..field_types.len())
        .map(|i| format_ident!("__stack_{}", i))
        .collect();

    // how to read a field out of `item`, and how to rebuild the struct
    let (accessors, construct) = match &data.fields {
        Fields::Named(fields) => {
            let idents: Vec<_> = fields.named.iter().filter_map(|f| f.ident.as_ref()).collect();
            let accessors: Vec<TokenStream2> = idents.iter().map(|i| quote!(#i)).collect();
            let construct = quote! {
                #name {
                    #( #idents: <#field_types as Stackable>::stack(#vec_names) ),*
                }
            };
            (accessors, construct)
        }
        Fields::Unnamed(_) => {
            let accessors: Vec<TokenStream2> = (0..field_types.len())
                .map(|i| {
                    let index = Index::from(i);
                    quote!(#index)
                })
                .collect();
            let construct = quote! {
                #name(
                    #( <#field_types as Stackable>::stack(#vec_names) ),*
                )
            };
            (accessors, construct)
        }
        Fields::Unit => unreachable!("unit structs have no fields"),
    };

    Ok(quote! {
        impl Stackable for #name
        where
            #( #field_types: Stackable<Output = #field_types> ),*
        {
            type Output = Self;

            fn stack(batch: Vec<Self>) -> Self::Output {
                #( let mut #vec_names = Vec::with_capacity(batch.len()); )*

                for item in batch {
                    #( #vec_names.push(item.#accessors); )*
                }

                #construct
            }
        }
    })
}
