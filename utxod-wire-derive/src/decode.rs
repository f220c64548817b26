use proc_macro::TokenStream;
use quote::quote;

pub fn impl_decode(ast: &syn::DeriveInput) -> TokenStream {
    let name = ast.ident.clone();
    match ast.data {
        syn::Data::Struct(ref data) => {
            let is_tuple = matches!(data.fields, syn::Fields::Unnamed(_));
            let statements: Vec<_> = data.fields.iter().map(decode_field).collect();

            let body = if is_tuple {
                quote! { #name ( #(#statements)* ) }
            } else {
                quote! { #name { #(#statements)* } }
            };

            let expanded = quote! {
                impl crate::serialization::Decode for #name {
                    fn decode<R: std::io::Read>(mut target: R) -> Result<Self, crate::serialization::CodecError> {
                        Ok(#body)
                    }
                }
            };
            TokenStream::from(expanded)
        }
        _ => unimplemented!("Decode can only be derived for structs; enums are hand-decoded by command tag"),
    }
}

fn decode_field(field: &syn::Field) -> proc_macro2::TokenStream {
    let ty = field.ty.clone();
    match field.ident.clone() {
        Some(name) => {
            quote! { #name: <#ty as crate::serialization::Decode>::decode(&mut target)?, }
        }
        None => {
            quote! { <#ty as crate::serialization::Decode>::decode(&mut target)?, }
        }
    }
}
