//! `Encode`/`Decode` derives.
//!
//! Structs and enum variants are both lowered to a [`Body`]: a constructor
//! path plus its fields. The same tokens serve as the destructuring pattern
//! when encoding and as the constructor when decoding, so field handling is
//! written once for both.

use darling::{FromDeriveInput, FromField, FromMeta, FromVariant};
use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Expr, Fields, Variant};

/// `#[encoding(...)]` on a field.
#[derive(Default, Debug, FromField)]
#[darling(attributes(encoding), forward_attrs(allow, doc, cfg))]
#[darling(default)]
struct FieldAttrs {
    /// Write the integer as a varint.
    varint: bool,
    /// The field is a `Vec`; this says how its length goes on the wire.
    length_prefix: Option<LengthPrefix>,
}

#[derive(Debug, Clone, Copy, FromMeta)]
enum LengthPrefix {
    #[darling(rename = "varint")]
    VarInt,
    /// No length at all: elements run to the end of the packet,
    /// so this only makes sense on the last field.
    #[darling(rename = "inferred")]
    Inferred,
}

/// `#[encoding(discriminant = "...")]` on an enum.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(encoding), forward_attrs(allow, doc, cfg))]
struct EnumAttrs {
    discriminant: DiscriminantKind,
}

#[derive(Debug, Clone, Copy, FromMeta)]
enum DiscriminantKind {
    #[darling(rename = "varint")]
    VarInt,
}

/// `#[encoding(id = ...)]` or `#[encoding(unknown)]` on a variant.
///
/// `id` takes any `i32` expression, usually a packet-ID constant. The
/// `unknown` variant wraps a `crate::protocol::UnknownPacket` and receives
/// every discriminant no other variant claims.
#[derive(Debug, FromVariant)]
#[darling(attributes(encoding), forward_attrs(allow, doc, cfg))]
struct VariantAttrs {
    #[darling(default)]
    id: Option<Expr>,
    #[darling(default)]
    unknown: bool,
}

/// How a field goes on the wire, after validating its attributes.
#[derive(Debug, Clone, Copy)]
enum Wire {
    Plain,
    VarInt,
    List(LengthPrefix),
}

#[derive(Debug)]
struct Field {
    /// The binding name: the field name, or `__<index>` for tuple fields.
    binding: Ident,
    wire: Wire,
}

#[derive(Debug)]
enum Style {
    Named,
    Tuple,
    Unit,
}

/// A constructor and its fields.
#[derive(Debug)]
struct Body {
    path: TokenStream,
    style: Style,
    fields: Vec<Field>,
}

#[derive(Debug)]
enum Tag {
    Id(Expr),
    Unknown,
}

#[derive(Debug)]
struct Case {
    tag: Tag,
    body: Body,
}

#[derive(Debug)]
enum Shape {
    Struct(Body),
    Enum {
        discriminant: DiscriminantKind,
        cases: Vec<Case>,
    },
}

impl Field {
    fn parse(index: usize, field: &syn::Field) -> syn::Result<Self> {
        let attrs = FieldAttrs::from_field(field)?;
        let wire = match (attrs.varint, attrs.length_prefix) {
            (true, Some(_)) => {
                return Err(syn::Error::new_spanned(
                    field,
                    "`varint` and `length_prefix` cannot be combined",
                ))
            }
            (true, None) => Wire::VarInt,
            (false, Some(prefix)) => Wire::List(prefix),
            (false, None) => Wire::Plain,
        };
        let binding = match &field.ident {
            Some(ident) => ident.clone(),
            None => format_ident!("__{}", index),
        };
        Ok(Self { binding, wire })
    }

    /// Statements writing the field, given a binding that is a reference.
    fn write(&self) -> TokenStream {
        let value = &self.binding;
        match self.wire {
            Wire::Plain => quote! {
                crate::protocol::Encode::encode(#value, encoder);
            },
            Wire::VarInt => quote! {
                encoder.write_var_int((*#value).try_into().unwrap_or(i32::MAX));
            },
            Wire::List(prefix) => {
                let length = match prefix {
                    LengthPrefix::VarInt => quote! {
                        encoder.write_var_int(#value.len().try_into().unwrap_or(i32::MAX));
                    },
                    LengthPrefix::Inferred => TokenStream::new(),
                };
                quote! {
                    #length
                    for item in #value.iter() {
                        crate::protocol::Encode::encode(item, encoder);
                    }
                }
            }
        }
    }

    /// A `let` statement reading the field into its binding.
    fn read(&self) -> TokenStream {
        let name = &self.binding;
        let value = match self.wire {
            Wire::Plain => quote! { crate::protocol::Decode::decode(decoder)? },
            Wire::VarInt => quote! { decoder.read_var_int()?.try_into()? },
            Wire::List(LengthPrefix::VarInt) => quote! {{
                let length = usize::try_from(decoder.read_var_int()?)?;
                // every element takes at least one byte
                if length > decoder.buffer().len() {
                    return Err(crate::protocol::DecodeError::EndOfStream(length));
                }
                let mut items = Vec::with_capacity(length);
                for _ in 0..length {
                    items.push(crate::protocol::Decode::decode(decoder)?);
                }
                items
            }},
            Wire::List(LengthPrefix::Inferred) => quote! {{
                let mut items = Vec::new();
                while !decoder.is_finished() {
                    items.push(crate::protocol::Decode::decode(decoder)?);
                }
                items
            }},
        };
        quote! { let #name = #value; }
    }
}

impl Body {
    fn parse(path: TokenStream, fields: &Fields) -> syn::Result<Self> {
        let style = match fields {
            Fields::Named(_) => Style::Named,
            Fields::Unnamed(_) => Style::Tuple,
            Fields::Unit => Style::Unit,
        };
        let fields = fields
            .iter()
            .enumerate()
            .map(|(i, field)| Field::parse(i, field))
            .collect::<syn::Result<_>>()?;
        Ok(Self {
            path,
            style,
            fields,
        })
    }

    /// `Path { a, b }`, `Path(__0)` or `Path`: a pattern binding every
    /// field, and equally an expression building the value from them.
    fn constructor(&self) -> TokenStream {
        let path = &self.path;
        let bindings = self.fields.iter().map(|f| &f.binding);
        match self.style {
            Style::Named => quote! { #path { #(#bindings),* } },
            Style::Tuple => quote! { #path ( #(#bindings),* ) },
            Style::Unit => quote! { #path },
        }
    }

    fn write_fields(&self) -> TokenStream {
        self.fields.iter().map(Field::write).collect()
    }

    fn read(&self) -> TokenStream {
        let reads = self.fields.iter().map(Field::read);
        let construct = self.constructor();
        quote! {
            #(#reads)*
            Ok(#construct)
        }
    }
}

impl Case {
    fn parse(variant: &Variant) -> syn::Result<Self> {
        let attrs = VariantAttrs::from_variant(variant)?;
        let ident = &variant.ident;
        let tag = match (attrs.id, attrs.unknown) {
            (Some(id), false) => Tag::Id(id),
            (None, true) => Tag::Unknown,
            (Some(_), true) => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "a variant cannot have both `id` and `unknown`",
                ))
            }
            (None, false) => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "variant needs either `id = ...` or `unknown`",
                ))
            }
        };
        let body = Body::parse(quote! { Self::#ident }, &variant.fields)?;
        if matches!(tag, Tag::Unknown)
            && !(matches!(body.style, Style::Tuple) && body.fields.len() == 1)
        {
            return Err(syn::Error::new_spanned(
                ident,
                "an `unknown` variant must wrap exactly one unnamed field",
            ));
        }
        Ok(Self { tag, body })
    }
}

impl Shape {
    fn parse(input: &DeriveInput) -> syn::Result<Self> {
        match &input.data {
            Data::Struct(data) => Body::parse(quote! { Self }, &data.fields).map(Shape::Struct),
            Data::Enum(data) => {
                let attrs = EnumAttrs::from_derive_input(input)?;
                let cases = data
                    .variants
                    .iter()
                    .map(Case::parse)
                    .collect::<syn::Result<Vec<_>>>()?;
                let unknowns = cases
                    .iter()
                    .filter(|case| matches!(case.tag, Tag::Unknown))
                    .count();
                if unknowns > 1 {
                    return Err(syn::Error::new_spanned(
                        &input.ident,
                        "only one variant may be marked `unknown`",
                    ));
                }
                Ok(Shape::Enum {
                    discriminant: attrs.discriminant,
                    cases,
                })
            }
            Data::Union(data) => Err(syn::Error::new_spanned(
                data.union_token,
                "cannot derive Encode/Decode on a union",
            )),
        }
    }

    fn encode_body(&self) -> TokenStream {
        match self {
            Shape::Struct(body) => {
                let pattern = body.constructor();
                let writes = body.write_fields();
                quote! {
                    let #pattern = self;
                    #writes
                }
            }
            Shape::Enum {
                discriminant,
                cases,
            } => {
                let arms = cases.iter().map(|case| {
                    let pattern = case.body.constructor();
                    // The unknown payload writes its own ID.
                    let tag = match (&case.tag, discriminant) {
                        (Tag::Id(id), DiscriminantKind::VarInt) => {
                            quote! { encoder.write_var_int(#id); }
                        }
                        (Tag::Unknown, _) => TokenStream::new(),
                    };
                    let writes = case.body.write_fields();
                    quote! {
                        #pattern => {
                            #tag
                            #writes
                        }
                    }
                });
                quote! {
                    match self {
                        #(#arms)*
                    }
                }
            }
        }
    }

    fn decode_body(&self) -> TokenStream {
        match self {
            Shape::Struct(body) => body.read(),
            Shape::Enum {
                discriminant,
                cases,
            } => {
                let read_tag = match discriminant {
                    DiscriminantKind::VarInt => quote! { decoder.read_var_int()? },
                };
                let mut arms = Vec::new();
                let mut otherwise = quote! {
                    Err(crate::protocol::DecodeError::InvalidDiscriminant(discriminant))
                };
                for case in cases {
                    match &case.tag {
                        Tag::Id(id) => {
                            let read = case.body.read();
                            arms.push(quote! {
                                d if d == (#id) => { #read }
                            });
                        }
                        Tag::Unknown => {
                            let path = &case.body.path;
                            otherwise = quote! {
                                Ok(#path(crate::protocol::UnknownPacket::decode_body(
                                    discriminant,
                                    decoder,
                                )))
                            };
                        }
                    }
                }
                quote! {
                    let discriminant: i32 = #read_tag;
                    match discriminant {
                        #(#arms)*
                        _ => #otherwise,
                    }
                }
            }
        }
    }
}

pub fn derive_encode_on(input: &DeriveInput) -> syn::Result<TokenStream> {
    let body = Shape::parse(input)?.encode_body();
    let ident = &input.ident;
    Ok(quote! {
        impl crate::protocol::Encode for #ident {
            fn encode(&self, encoder: &mut crate::protocol::Encoder) {
                #body
            }
        }
    })
}

pub fn derive_decode_on(input: &DeriveInput) -> syn::Result<TokenStream> {
    let body = Shape::parse(input)?.decode_body();
    let ident = &input.ident;
    Ok(quote! {
        impl crate::protocol::Decode for #ident {
            fn decode(
                decoder: &mut crate::protocol::Decoder,
            ) -> ::std::result::Result<Self, crate::protocol::DecodeError> {
                #body
            }
        }
    })
}
