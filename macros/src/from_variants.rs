use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields};

/// Emits `impl From<Payload> for Enum` for every variant that wraps
/// exactly one unnamed field, so packets can be built with `.into()`.
pub fn derive_from_variants_on(input: &DeriveInput) -> syn::Result<TokenStream> {
    let Data::Enum(en) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "only enums are supported",
        ));
    };

    let enum_ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let impls = en.variants.iter().filter_map(|variant| {
        let Fields::Unnamed(fields) = &variant.fields else {
            return None;
        };
        if fields.unnamed.len() != 1 {
            return None;
        }
        let variant_ident = &variant.ident;
        let ty = &fields.unnamed[0].ty;
        Some(quote! {
            impl #impl_generics From<#ty> for #enum_ident #ty_generics #where_clause {
                fn from(value: #ty) -> Self {
                    Self::#variant_ident(value)
                }
            }
        })
    });

    Ok(quote! {
        #(#impls)*
    })
}
