//! Derive macros for the consensus-critical wire codec used across the
//! workspace. Mirrors field order exactly: a struct's `Encode` impl writes
//! fields in declaration order, and its `Decode` impl reads them back in
//! the same order. Enums encode/decode by the order variants are declared.

extern crate proc_macro;
use proc_macro::TokenStream;

mod decode;
mod encode;

#[proc_macro_derive(Decode)]
pub fn decode(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    decode::impl_decode(&ast)
}

#[proc_macro_derive(Encode)]
pub fn encode(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    encode::impl_encode(&ast)
}
