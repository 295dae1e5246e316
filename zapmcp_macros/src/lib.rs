//! Derive support for `zapmcp::ToolParameters`.
//!
//! `#[derive(ToolParameters)]` turns a struct with named fields into a JSON Schema object
//! description that is advertised as a tool's `inputSchema`.

extern crate proc_macro;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::ext::IdentExt;
use syn::parse::{Parse, ParseStream};
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Expr, Field, Fields, GenericArgument, Ident,
    Lit, LitBool, LitStr, Meta, PathArguments, Result as SynResult, Token, Type,
};

#[derive(Default, Debug)]
struct ParamAttrs {
    desc: Option<String>,
    rename: Option<String>,
    skip: bool,
    required: Option<bool>,
}

impl Parse for ParamAttrs {
    fn parse(input: ParseStream) -> SynResult<Self> {
        let mut attrs = ParamAttrs::default();
        while !input.is_empty() {
            let key: Ident = input.call(Ident::parse_any)?;

            if key == "desc" {
                input.parse::<Token![=]>()?;
                attrs.desc = Some(input.parse::<LitStr>()?.value());
            } else if key == "rename" {
                input.parse::<Token![=]>()?;
                attrs.rename = Some(input.parse::<LitStr>()?.value());
            } else if key == "skip" {
                attrs.skip = if input.peek(Token![=]) {
                    input.parse::<Token![=]>()?;
                    input.parse::<LitBool>()?.value
                } else {
                    true
                };
            } else if key == "required" {
                attrs.required = if input.peek(Token![=]) {
                    input.parse::<Token![=]>()?;
                    Some(input.parse::<LitBool>()?.value)
                } else {
                    Some(true)
                };
            } else {
                return Err(syn::Error::new(
                    key.span(),
                    format!("unknown param attribute key: {}", key),
                ));
            }

            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }
        Ok(attrs)
    }
}

/// Merges every `#[param(...)]` on a field. Later attributes override earlier ones.
fn parse_field_attributes(field: &Field) -> SynResult<ParamAttrs> {
    let mut merged = ParamAttrs::default();

    for attr in field.attrs.iter().filter(|a| a.path().is_ident("param")) {
        let Meta::List(list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                attr.meta.to_token_stream(),
                "expected #[param(key = value, ...)]",
            ));
        };
        let parsed = list.parse_args::<ParamAttrs>()?;
        if parsed.desc.is_some() {
            merged.desc = parsed.desc;
        }
        if parsed.rename.is_some() {
            merged.rename = parsed.rename;
        }
        merged.skip |= parsed.skip;
        if parsed.required.is_some() {
            merged.required = parsed.required;
        }
    }

    if merged.desc.is_none() {
        merged.desc = doc_comment(&field.attrs);
    }
    Ok(merged)
}

/// Joins `///` lines so an undocumented `desc` falls back to the field's doc comment.
fn doc_comment(attrs: &[Attribute]) -> Option<String> {
    let lines: Vec<String> = attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .filter_map(|a| match &a.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(expr) => match &expr.lit {
                    Lit::Str(s) => Some(s.value().trim().to_string()),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        })
        .collect();
    let joined = lines.join(" ").trim().to_string();
    (!joined.is_empty()).then_some(joined)
}

/// Returns the single generic argument of `Wrapper<T>` when the last path segment is `wrapper`.
fn generic_inner<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    if type_path.qself.is_some() {
        return None;
    }
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().rev().find_map(|arg| match arg {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    })
}

fn is_option(ty: &Type) -> bool {
    generic_inner(ty, "Option").is_some()
}

fn type_to_schema(ty: &Type, struct_name: &Ident) -> TokenStream2 {
    if let Some(inner) = generic_inner(ty, "Option") {
        return type_to_schema(inner, struct_name);
    }
    if let Some(inner) = generic_inner(ty, "Vec") {
        let items = type_to_schema(inner, struct_name);
        return quote! { ::serde_json::json!({ "type": "array", "items": #items }) };
    }
    if let Some(inner) = generic_inner(ty, "HashMap").or_else(|| generic_inner(ty, "BTreeMap")) {
        let values = type_to_schema(inner, struct_name);
        return quote! { ::serde_json::json!({ "type": "object", "additionalProperties": #values }) };
    }

    let Type::Path(type_path) = ty else {
        let msg = format!(
            "unsupported field type for ToolParameters: {}",
            ty.to_token_stream()
        );
        return quote! { compile_error!(#msg) };
    };
    if type_path.qself.is_some() {
        return quote! { compile_error!("qualified type paths are not supported by ToolParameters") };
    }

    let path = &type_path.path;
    let last = path
        .segments
        .last()
        .map(|s| s.ident.to_string())
        .unwrap_or_default();
    match last.as_str() {
        "String" | "str" | "char" => quote! { ::serde_json::json!({ "type": "string" }) },
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
        | "u128" | "usize" => quote! { ::serde_json::json!({ "type": "integer" }) },
        "f32" | "f64" => quote! { ::serde_json::json!({ "type": "number" }) },
        "bool" => quote! { ::serde_json::json!({ "type": "boolean" }) },
        "Value" => quote! { ::serde_json::json!({}) },
        _ if path.is_ident(struct_name) => {
            let msg = format!("recursive ToolParameters type `{}` is not supported", last);
            quote! { compile_error!(#msg) }
        }
        _ => quote! { <#path as ::zapmcp::ToolParameters>::input_schema() },
    }
}

#[proc_macro_derive(ToolParameters, attributes(param))]
pub fn tool_parameters_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => named.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return TokenStream::from(quote! {
                    compile_error!("ToolParameters can only be derived for structs with named fields.");
                });
            }
        },
        _ => {
            return TokenStream::from(quote! {
                compile_error!("ToolParameters can only be derived for structs.");
            });
        }
    };

    let mut property_inserts = Vec::new();
    let mut required = Vec::new();
    let mut errors = TokenStream2::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let attrs = match parse_field_attributes(field) {
            Ok(attrs) => attrs,
            Err(err) => {
                errors.extend(err.to_compile_error());
                continue;
            }
        };
        if attrs.skip {
            continue;
        }

        let property = attrs
            .rename
            .clone()
            .unwrap_or_else(|| ident.unraw().to_string());
        let base = type_to_schema(&field.ty, name);
        let schema = match &attrs.desc {
            Some(desc) => quote! {
                {
                    let mut schema = #base;
                    if let Some(obj) = schema.as_object_mut() {
                        obj.insert("description".to_string(), ::serde_json::json!(#desc));
                    }
                    schema
                }
            },
            None => base,
        };
        property_inserts.push(quote! {
            properties.insert(#property.to_string(), #schema);
        });

        if attrs.required.unwrap_or(!is_option(&field.ty)) {
            required.push(property);
        }
    }

    if !errors.is_empty() {
        return TokenStream::from(errors);
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let expanded = quote! {
        impl #impl_generics ::zapmcp::ToolParameters for #name #ty_generics #where_clause {
            fn input_schema() -> ::serde_json::Value {
                static SCHEMA: ::once_cell::sync::Lazy<::serde_json::Value> =
                    ::once_cell::sync::Lazy::new(|| {
                        let mut properties = ::serde_json::Map::new();
                        #(#property_inserts)*

                        let mut schema = ::serde_json::Map::new();
                        schema.insert("type".to_string(), ::serde_json::json!("object"));
                        schema.insert("properties".to_string(), ::serde_json::Value::Object(properties));
                        let required: &[&str] = &[#(#required),*];
                        if !required.is_empty() {
                            schema.insert("required".to_string(), ::serde_json::json!(required));
                        }
                        ::serde_json::Value::Object(schema)
                    });
                SCHEMA.clone()
            }
        }
    };

    TokenStream::from(expanded)
}
