//! `#[derive(Traceable)]`: wires a struct's `TraceableBase` field and
//! `Cell<Self, T>` fields into the `tracegraph::Traceable` trait (identity,
//! home graph, and construction-time bulk-override dispatch).
//!
//! The generated code refers to the engine crate by its published path,
//! `::tracegraph`, rather than `crate::...`. Unlike an attribute macro used
//! inside the crate that defines the trait it wires up, this derive is
//! consumed by downstream crates that depend on `tracegraph`, so there is
//! no single relative path that works both for them and for the defining
//! crate itself.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, GenericArgument, PathArguments, Type, parse_macro_input};

#[proc_macro_derive(Traceable)]
pub fn derive_traceable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let struct_name = &input.ident;
    let type_name = struct_name.to_string();

    let Data::Struct(data) = &input.data else {
        return compile_error(&type_name, "`#[derive(Traceable)]` only supports structs");
    };
    let Fields::Named(fields) = &data.fields else {
        return compile_error(&type_name, "`#[derive(Traceable)]` requires named fields");
    };

    let mut base_field = None;
    let mut cell_fields = Vec::new();

    for field in &fields.named {
        let ident = field.ident.as_ref().expect("named field");
        match last_segment_ident(&field.ty).as_deref() {
            Some("TraceableBase") => {
                if base_field.is_some() {
                    return compile_error(&type_name, "more than one `TraceableBase` field");
                }
                base_field = Some(ident.clone());
            }
            Some("Cell") => {
                if let Some(value_ty) = second_generic_arg(&field.ty) {
                    cell_fields.push((ident.clone(), field.ident.as_ref().unwrap().to_string(), value_ty));
                }
            }
            _ => {}
        }
    }

    let Some(base_field) = base_field else {
        return compile_error(&type_name, "no `TraceableBase` field found (add one and name it, e.g. `base: TraceableBase`)");
    };

    let override_arms = cell_fields.iter().map(|(field_ident, name_str, value_ty)| {
        quote! {
            if let Some(__v) = __overrides.take::<#value_ty>(#name_str) {
                self.#field_ident.set(self, __v)?;
            }
        }
    });

    let expanded = quote! {
        impl ::tracegraph::Traceable for #struct_name {
            const TYPE_NAME: &'static str = #type_name;

            fn base(&self) -> &::tracegraph::TraceableBase {
                &self.#base_field
            }

            fn apply_overrides(&self, mut __overrides: ::tracegraph::CellOverrides) -> ::std::result::Result<(), ::tracegraph::GraphError> {
                #(#override_arms)*
                __overrides.reject_all(<Self as ::tracegraph::Traceable>::TYPE_NAME)
            }
        }
    };

    TokenStream::from(expanded)
}

fn last_segment_ident(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(p) => p.path.segments.last().map(|s| s.ident.to_string()),
        _ => None,
    }
}

fn second_generic_arg(ty: &Type) -> Option<Type> {
    let Type::Path(p) = ty else { return None };
    let segment = p.path.segments.last()?;
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    let types: Vec<&Type> = args
        .args
        .iter()
        .filter_map(|a| match a {
            GenericArgument::Type(t) => Some(t),
            _ => None,
        })
        .collect();
    types.get(1).map(|t| (*t).clone())
}

fn compile_error(type_name: &str, message: &str) -> TokenStream {
    let message = format!("derive(Traceable) on `{type_name}`: {message}");
    TokenStream::from(quote! {
        compile_error!(#message);
    })
}
