use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, punctuated::Punctuated, Ident, ItemFn};

/// Proc macro to denote a Transaction
///
/// The body is timed and recorded under the `transaction_duration` and `transaction_failed`
/// metrics, labelled with the function name. Only works on `async` functions returning a
/// `Result<T, E>`.
///
/// # Example
/// ```ignore
/// use rampart::prelude::*;
///
/// #[transaction]
/// async fn login(ctx: &VuContext, user: &str) -> anyhow::Result<String> {
///     ...
/// }
/// ```
#[proc_macro_attribute]
pub fn transaction(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    transaction_internal(attr.into(), input).into()
}

fn transaction_internal(_attr: TokenStream2, input: ItemFn) -> TokenStream2 {
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig.fn_token, "#[transaction] requires an async fn")
            .to_compile_error();
    }

    let name = &sig.ident;
    let stmts = &block.stmts;

    quote! {
        #(#attrs)* #vis #sig {
            ::rampart::transaction::transaction_hook(stringify!(#name), async move {
                #(#stmts)*
            }).await
        }
    }
}

/// Proc macro to denote a Scenario
///
/// Works on an `async fn` taking a single `VuContext` and returning `anyhow::Result<()>`. The
/// function is replaced by one taking no arguments and returning a configurable run, so stages and
/// thresholds can be chained onto it before awaiting.
///
/// See the `Run` struct for more information on the methods this macro provides on functions.
///
/// # Example
/// ```ignore
/// use rampart::prelude::*;
///
/// #[scenario]
/// async fn my_scenario(ctx: VuContext) -> anyhow::Result<()> {
///     ctx.http().get("/health").await;
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn scenario(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    scenario_internal(attr.into(), input).into()
}

fn scenario_internal(_attr: TokenStream2, input: ItemFn) -> TokenStream2 {
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig.fn_token, "#[scenario] requires an async fn")
            .to_compile_error();
    }
    if sig.inputs.len() != 1 {
        return syn::Error::new_spanned(
            &sig.inputs,
            "#[scenario] functions take exactly one argument, the `VuContext`",
        )
        .to_compile_error();
    }

    let stmts = &block.stmts;

    let new_name = Ident::new(&format!("__rampart_{}", sig.ident), Span::call_site());
    let mut new_sig = sig.clone();
    new_sig.ident = new_name.clone();

    let mut run_sig = sig.clone();
    let run_name = sig.ident.clone();
    run_sig.asyncness = None;
    run_sig.inputs = Punctuated::new();
    run_sig.output = syn::parse_quote! {
        -> impl ::rampart::run::ConfigurableRun
    };

    quote! {
        #(#attrs)* #vis #run_sig {
            ::rampart::run::Run::new(stringify!(#run_name), #new_name)
        }

        #(#attrs)* #vis #new_sig {
            #(#stmts)*
        }
    }
}
