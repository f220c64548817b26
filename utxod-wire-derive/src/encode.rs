use proc_macro::TokenStream;
use quote::quote;

pub fn impl_encode(ast: &syn::DeriveInput) -> TokenStream {
    let name = ast.ident.clone();
    match ast.data {
        syn::Data::Struct(ref data) => {
            let statements: Vec<_> = data
                .fields
                .iter()
                .enumerate()
                .map(|(index, field)| encode_field(field, index))
                .collect();

            let expanded = quote! {
                impl crate::serialization::Encode for #name {
                    fn encode<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
                        #(#statements)*
                        Ok(())
                    }
                }
            };
            TokenStream::from(expanded)
        }
        syn::Data::Enum(ref data) => {
            let variants: Vec<_> = data
                .variants
                .iter()
                .map(|variant| encode_variant(variant, &name))
                .collect();

            let expanded = quote! {
                impl crate::serialization::Encode for #name {
                    fn encode<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
                        match *self {
                            #(#variants)*
                        }
                        Ok(())
                    }
                }
            };
            TokenStream::from(expanded)
        }
        _ => unimplemented!("Encode cannot be derived for unions"),
    }
}

fn encode_field(field: &syn::Field, index: usize) -> proc_macro2::TokenStream {
    match field.ident.clone() {
        Some(id) => quote! { self.#id.encode(&mut target)?; },
        None => {
            let index = syn::Index::from(index);
            quote! { self.#index.encode(&mut target)?; }
        }
    }
}

fn encode_variant(variant: &syn::Variant, name: &syn::Ident) -> proc_macro2::TokenStream {
    let ident = variant.ident.clone();

    let bindings: Vec<_> = variant
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| match field.ident.clone() {
            Some(ident) => quote! { ref #ident, },
            None => {
                let binder = quote::format_ident!("field_{}", i);
                quote! { ref #binder, }
            }
        })
        .collect();

    let statements: Vec<_> = variant
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| match field.ident.clone() {
            Some(ident) => quote! { #ident.encode(&mut target)?; },
            None => {
                let binder = quote::format_ident!("field_{}", i);
                quote! { #binder.encode(&mut target)?; }
            }
        })
        .collect();

    let has_named = variant.fields.iter().any(|f| f.ident.is_some());
    if bindings.is_empty() {
        quote! { #name::#ident => {}, }
    } else if has_named {
        quote! { #name::#ident { #(#bindings)* } => {
            #(#statements)*
        }, }
    } else {
        quote! { #name::#ident ( #(#bindings)* ) => {
            #(#statements)*
        }, }
    }
}
