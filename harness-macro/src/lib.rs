// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::parse_macro_input;

struct MacroArgs {
    timeout_cycles: Option<syn::LitInt>,
}

impl syn::parse::Parse for MacroArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        syn::custom_keyword!(timeout_cycles);

        let mut timeout = None;
        while !input.is_empty() {
            let lookahead = input.lookahead1();
            if lookahead.peek(timeout_cycles) {
                let keyword = input.parse::<timeout_cycles>()?;
                if timeout.is_some() {
                    return Err(syn::Error::new_spanned(
                        keyword,
                        "`timeout_cycles` was specified more than once",
                    ));
                }
                input.parse::<syn::Token![=]>()?;
                let value = input.parse::<syn::LitInt>()?;
                value.base10_parse::<u64>()?;
                timeout = Some(value);
            } else {
                return Err(lookahead.error());
            }

            if !input.is_empty() {
                input.parse::<syn::Token![,]>()?;
            }
        }

        Ok(Self {
            timeout_cycles: timeout,
        })
    }
}

/// Registers a Caravel testbench and wraps it in outcome reporting.
///
/// For example:
/// ```ignore
/// #[scenario(timeout_cycles = 1_000_000)]
/// fn basic_test(env: &mut CaravelEnv) -> Result<(), TestFailure> {
///     env.release_csb();
///     wait_for_pulses(env, 1, "firmware configuration complete")?;
///     Ok(())
/// }
/// ```
///
/// This defines a `static basic_test: &'static dyn Scenario` with the same
/// visibility as the function. Run it with `run_scenario`, which configures
/// the environment with the given budget (or the harness default when
/// omitted) and records the outcome under the function's name.
///
/// The function must be synchronous, non-generic, and take exactly one
/// `&mut CaravelEnv` argument. Bring the harness prelude into scope so the
/// generated code can find `caravel_harness`.
#[proc_macro_attribute]
pub fn scenario(args: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as MacroArgs);
    let item_fn = parse_macro_input!(item as syn::ItemFn);

    if item_fn.sig.generics.lt_token.is_some() {
        return syn::Error::new_spanned(
            item_fn.sig.generics,
            "Generics are not supported for scenarios",
        )
        .into_compile_error()
        .into();
    }

    if let Some(asyncness) = &item_fn.sig.asyncness {
        return syn::Error::new_spanned(
            asyncness,
            "Scenarios must be synchronous: waits block on the simulation instead",
        )
        .into_compile_error()
        .into();
    }

    if matches!(item_fn.sig.output, syn::ReturnType::Default) {
        return syn::Error::new_spanned(
            &item_fn.sig,
            "Scenarios must return `Result<(), TestFailure>`",
        )
        .into_compile_error()
        .into();
    }

    let mut inputs = item_fn.sig.inputs.iter();
    let (Some(input), None) = (inputs.next(), inputs.next()) else {
        return syn::Error::new_spanned(
            &item_fn.sig.inputs,
            "Scenarios take exactly one `&mut CaravelEnv` argument",
        )
        .into_compile_error()
        .into();
    };

    let syn::FnArg::Typed(parameter) = input else {
        return syn::Error::new_spanned(
            input,
            "Scenarios cannot take `self`",
        )
        .into_compile_error()
        .into();
    };

    let syn::Pat::Ident(env_name) = &*parameter.pat else {
        return syn::Error::new_spanned(
            &parameter.pat,
            "Function argument must be an identifier",
        )
        .into_compile_error()
        .into();
    };

    if !matches!(
        &*parameter.ty,
        syn::Type::Reference(syn::TypeReference {
            mutability: Some(_),
            ..
        })
    ) {
        return syn::Error::new_spanned(
            &parameter.ty,
            "The environment must be taken as `&mut CaravelEnv`",
        )
        .into_compile_error()
        .into();
    }

    let (documentation, attributes): (Vec<_>, Vec<_>) = item_fn
        .attrs
        .iter()
        .partition(|attribute| attribute.path().is_ident("doc"));
    let visibility = &item_fn.vis;
    let function_name = &item_fn.sig.ident;
    let body = &item_fn.block;

    let struct_name = format_ident!("__SCENARIO_{}", function_name);
    let function_name_literal = syn::LitStr::new(
        function_name.to_string().as_str(),
        function_name.span(),
    );
    let timeout_cycles: proc_macro2::TokenStream = match &args.timeout_cycles {
        Some(timeout_cycles) => quote! { #timeout_cycles },
        None => quote! { caravel_harness::DEFAULT_TIMEOUT_CYCLES },
    };

    quote! {
        #[allow(non_camel_case_types)]
        struct #struct_name;

        impl caravel_harness::scenario::Scenario for #struct_name {
            fn name(&self) -> &'static str {
                #function_name_literal
            }

            fn timeout_cycles(&self) -> u64 {
                #timeout_cycles
            }

            #(#attributes)*
            fn run(
                &self,
                #env_name: &mut caravel_harness::CaravelEnv<'_>,
            ) -> ::core::result::Result<(), caravel_harness::TestFailure>
                #body
        }

        #(#documentation)*
        #[allow(non_upper_case_globals)]
        #visibility static #function_name: &'static dyn caravel_harness::scenario::Scenario = &#struct_name;
    }
    .into()
}
