use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Path, parse_macro_input, spanned::Spanned};

/// Implements `Identifiable`, `Hooks` and `Model` by delegating to embedded
/// field groups.
///
/// Struct options, `#[model(...)]`:
/// - `collection = "name"`: custom collection name
/// - `collection_with = path::to::fn`: custom collection handle,
///   `fn(&Self, &Database) -> Option<Collection<Self>>`
/// - `custom_hooks`: skip the generated `Hooks` impl; field hook roles are
///   then ignored and the type calls them from its own impl
///
/// Field options, `#[model(...)]`:
/// - `base`: identifier source and hook participant (e.g. `DefaultModel`)
/// - `id`: identifier source only (e.g. `IdField`)
/// - `hooks`: hook participant only (e.g. `DateFields`)
#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_model(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct ModelOptions {
    collection: Option<LitStr>,
    collection_with: Option<Path>,
    custom_hooks: bool,
}

#[derive(Default)]
struct FieldRole {
    id: bool,
    hooks: bool,
}

fn expand_model(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;
    let options = parse_model_options(&input.attrs)?;

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Model can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Model requires named fields",
            ));
        }
    };

    let mut id_field: Option<Ident> = None;
    let mut hook_fields = Vec::<Ident>::new();

    for field in &named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Model requires named fields"))?;
        let role = parse_field_role(&field.attrs)?;

        if role.id {
            if id_field.is_some() {
                return Err(syn::Error::new(
                    field.span(),
                    "Only one field may be marked #[model(base)] or #[model(id)]",
                ));
            }
            id_field = Some(ident.clone());
        }
        if role.hooks {
            hook_fields.push(ident);
        }
    }

    let id_field = id_field.ok_or_else(|| {
        syn::Error::new(
            struct_name.span(),
            "Model needs an identifier field: mark it #[model(base)] or #[model(id)]",
        )
    })?;

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let identifiable_impl = quote! {
        impl #impl_generics ::docmodel::Identifiable for #struct_name #ty_generics #where_clause {
            fn get_id(&self) -> ::core::option::Option<::docmodel::bson::oid::ObjectId> {
                ::docmodel::Identifiable::get_id(&self.#id_field)
            }

            fn set_id(&mut self, id: ::docmodel::bson::oid::ObjectId) -> ::docmodel::Result<()> {
                ::docmodel::Identifiable::set_id(&mut self.#id_field, id)
            }

            fn get_id_str(&self) -> &str {
                ::docmodel::Identifiable::get_id_str(&self.#id_field)
            }
        }
    };

    let hooks_impl = if options.custom_hooks {
        quote!()
    } else {
        let hook_methods = ["creating", "saving", "updating", "deleting"].map(|hook| {
            let hook = Ident::new(hook, proc_macro2::Span::call_site());
            quote! {
                fn #hook(&mut self) -> ::docmodel::Result<()> {
                    #( ::docmodel::Hooks::#hook(&mut self.#hook_fields)?; )*
                    ::core::result::Result::Ok(())
                }
            }
        });
        quote! {
            impl #impl_generics ::docmodel::Hooks for #struct_name #ty_generics #where_clause {
                #(#hook_methods)*
            }
        }
    };

    let collection_name_fn = options.collection.map(|name| {
        quote! {
            fn collection_name() -> ::core::option::Option<&'static str> {
                ::core::option::Option::Some(#name)
            }
        }
    });

    let collection_fn = options.collection_with.map(|path| {
        quote! {
            fn collection(
                &self,
                db: &::docmodel::Database,
            ) -> ::core::option::Option<::docmodel::Collection<Self>> {
                #path(self, db)
            }
        }
    });

    Ok(quote! {
        #identifiable_impl

        #hooks_impl

        impl #impl_generics ::docmodel::Model for #struct_name #ty_generics #where_clause {
            #collection_name_fn
            #collection_fn
        }
    })
}

fn parse_model_options(attrs: &[syn::Attribute]) -> syn::Result<ModelOptions> {
    let mut options = ModelOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("model") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                if lit.value().is_empty() {
                    return Err(meta.error("collection name cannot be empty"));
                }
                options.collection = Some(lit);
                return Ok(());
            }

            if meta.path.is_ident("collection_with") {
                let value = meta.value()?;
                options.collection_with = Some(value.parse()?);
                return Ok(());
            }

            if meta.path.is_ident("custom_hooks") {
                options.custom_hooks = true;
                return Ok(());
            }

            Err(meta.error(
                "Unsupported model attribute. Supported: collection = \"...\", collection_with = path, custom_hooks",
            ))
        })?;
    }

    Ok(options)
}

fn parse_field_role(attrs: &[syn::Attribute]) -> syn::Result<FieldRole> {
    let mut role = FieldRole::default();

    for attr in attrs {
        if !attr.path().is_ident("model") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("base") {
                role.id = true;
                role.hooks = true;
                return Ok(());
            }

            if meta.path.is_ident("id") {
                role.id = true;
                return Ok(());
            }

            if meta.path.is_ident("hooks") {
                role.hooks = true;
                return Ok(());
            }

            Err(meta.error("Unsupported field attribute. Supported: base, id, hooks"))
        })?;
    }

    Ok(role)
}
