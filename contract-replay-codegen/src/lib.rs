use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use quote::quote_spanned;

/// Turns `async fn name(exchange: &mut Exchange) { .. }` into a `#[test]` that runs the body
/// inside a provider state.
///
/// ```ignore
/// #[provider_state_test("a job with a known id exists", registry)]
/// async fn known_job_has_a_status(exchange: &mut Exchange) {
///     assert!(exchange.stashed("known_id").is_some());
/// }
/// ```
///
/// `registry` is an async function returning the state registry (or an `Arc` of it). The
/// state is torn down even when the body panics.
#[proc_macro_attribute]
pub fn provider_state_test(attrs: TokenStream, item: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(item as syn::ItemFn);
    let args = syn::parse_macro_input!(attrs as syn::AttributeArgs);

    let attributes = &input.attrs;
    let visibility = &input.vis;
    let name = &input.sig.ident;
    let inputs = &input.sig.inputs;
    let block = &input.block;

    if args.len() < 2 {
        return quote! {
            compile_error!("A provider state name and a registry function should be passed to the macro");
        }
        .into();
    }

    let state_name: String;
    if let syn::NestedMeta::Lit(syn::Lit::Str(parsed_state_name)) = &args[0] {
        state_name = parsed_state_name.value();
        if let Err(stream) = validate_state_name(&state_name, parsed_state_name.span()) {
            return stream.into();
        }
    } else {
        return quote! {
            compile_error!("The first argument should be a string literal!");
        }
        .into();
    }

    let registry_function;
    if let syn::NestedMeta::Meta(syn::Meta::Path(function_path)) = &args[1] {
        registry_function = function_path;
    } else {
        return quote! {
            compile_error!("The second argument should be a registry function!");
        }
        .into();
    }

    if input.sig.asyncness.is_none() {
        return quote_spanned! {input.sig.fn_token.span=>
            compile_error!("A provider state test should be an async function!");
        }
        .into();
    }

    if inputs.len() != 1 {
        return quote_spanned! {name.span()=>
            compile_error!("A provider state test takes exactly one argument: the exchange");
        }
        .into();
    }

    let output = quote! {
        #[test]
        #(#attributes)*
        #visibility fn #name() {
            async fn __contract_body(#inputs) #block

            fn __contract_boxed<'a>(
                exchange: &'a mut ::contract_replay::Exchange,
            ) -> ::futures::future::LocalBoxFuture<'a, ()> {
                ::std::boxed::Box::pin(__contract_body(exchange))
            }

            let __contract_runtime = ::tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to start the test runtime");

            __contract_runtime.block_on(async {
                let __contract_registry = #registry_function().await;
                if let Err(e) =
                    ::contract_replay::run_in_state(&__contract_registry, #state_name, __contract_boxed).await
                {
                    panic!("Provider state error: {}", e);
                }
            });
        }
    };

    TokenStream::from(output)
}

fn validate_state_name(name: &str, span: Span) -> Result<(), proc_macro2::TokenStream> {
    if name.trim().is_empty() {
        return Err(quote_spanned! {span=>
            compile_error!("The provider state name should not be empty!");
        });
    }

    Ok(())
}
