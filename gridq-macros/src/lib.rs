use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Test attribute that installs gridq's tracing subscriber before the body runs.
///
/// Async tests get a tokio runtime; any arguments are forwarded to
/// `#[tokio::test(...)]`, e.g. `#[gridq::test(flavor = "multi_thread", worker_threads = 4)]`.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let runtime_args = proc_macro2::TokenStream::from(attr);
    let input = parse_macro_input!(item as ItemFn);
    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = &input.sig.ident;

    let runtime_args = if runtime_args.is_empty() {
        quote! {}
    } else {
        quote! { ( #runtime_args ) }
    };

    let output = if sig.asyncness.is_some() {
        quote! {
            #[tokio::test #runtime_args]
            #(#attrs)*
            #vis #sig {
                gridq::trace::with_test_tracing(stringify!(#name), || async move #block).await
            }
        }
    } else {
        quote! {
            #[test]
            #(#attrs)*
            #vis #sig {
                gridq::trace::with_test_tracing_sync(stringify!(#name), || #block)
            }
        }
    };
    output.into()
}
