//! Procedural macros for store-dispatch

use darling::{FromDeriveInput, FromVariant};
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Container-level attributes for #[derive(Action)]
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(action), supports(enum_any, struct_any))]
struct ActionOpts {
    ident: syn::Ident,
    generics: syn::Generics,
    data: darling::ast::Data<ActionVariant, darling::util::Ignored>,

    /// Explicit name for a struct action
    #[darling(default)]
    name: Option<String>,
}

/// Variant-level attributes
#[derive(Debug, FromVariant)]
#[darling(attributes(action))]
struct ActionVariant {
    ident: syn::Ident,
    fields: darling::ast::Fields<darling::util::Ignored>,

    /// Explicit name override
    #[darling(default)]
    name: Option<String>,
}

/// Derive the `Action` trait.
///
/// Enums report the variant name, structs report the type name. Either can
/// be overridden with `#[action(name = "...")]`.
///
/// # Example
///
/// ```ignore
/// #[derive(Action, Debug)]
/// enum Counter {
///     Increment,
///     Add(i64),
///     #[action(name = "CounterReset")]
///     Reset { to: i64 },
/// }
///
/// #[derive(Action, Debug)]
/// struct LoadUser {
///     id: u64,
/// }
///
/// assert_eq!(Counter::Add(2).name(), "Add");
/// assert_eq!(Counter::Reset { to: 0 }.name(), "CounterReset");
/// assert_eq!(LoadUser { id: 1 }.name(), "LoadUser");
/// ```
#[proc_macro_derive(Action, attributes(action))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match ActionOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    let name = &opts.ident;
    let (impl_generics, ty_generics, where_clause) = opts.generics.split_for_impl();

    let body = match &opts.data {
        darling::ast::Data::Enum(variants) => {
            if opts.name.is_some() {
                return syn::Error::new_spanned(
                    &input.ident,
                    "#[action(name)] on an enum is not supported; rename individual variants",
                )
                .to_compile_error()
                .into();
            }
            if variants.is_empty() {
                quote! { match *self {} }
            } else {
                let name_arms = variants.iter().map(|v| {
                    let variant_name = &v.ident;
                    let variant_str = v.name.clone().unwrap_or_else(|| variant_name.to_string());

                    match &v.fields.style {
                        darling::ast::Style::Unit => quote! {
                            #name::#variant_name => #variant_str
                        },
                        darling::ast::Style::Tuple => quote! {
                            #name::#variant_name(..) => #variant_str
                        },
                        darling::ast::Style::Struct => quote! {
                            #name::#variant_name { .. } => #variant_str
                        },
                    }
                });
                quote! {
                    match self {
                        #(#name_arms),*
                    }
                }
            }
        }
        darling::ast::Data::Struct(_) => {
            let struct_str = opts.name.clone().unwrap_or_else(|| name.to_string());
            quote! { #struct_str }
        }
    };

    let expanded = quote! {
        impl #impl_generics ::store_dispatch::Action for #name #ty_generics #where_clause {
            fn name(&self) -> &'static str {
                #body
            }
        }
    };

    TokenStream::from(expanded)
}
