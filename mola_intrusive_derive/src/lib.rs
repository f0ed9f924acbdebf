use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Attribute, Data, DataStruct, DeriveInput, Fields, Ident, LitStr, Token, Type, TypePath,
    parse::{Parse, ParseStream},
    parse_macro_input,
};

struct NodeAttribute {
    crate_path: syn::Path,
}

/// Parses the attribute in the format: `crate_path = "path::to::crate"`.
impl Parse for NodeAttribute {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let key: Ident = input.parse()?;
        if key != "crate_path" {
            return Err(syn::Error::new(key.span(), "expected attribute `crate_path`"));
        }

        let _: Token![=] = input.parse()?;
        let value: LitStr = input.parse()?;
        let path: syn::Path = value.parse()?;

        Ok(NodeAttribute { crate_path: path })
    }
}

/// Returns true if one of the attributes is `#[repr(C)]` or `#[repr(transparent)]`.
fn has_stable_layout(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut stable = false;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("repr")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("C") || meta.path.is_ident("transparent") {
                stable = true;
            }
            // Skip arguments such as `align(64)`.
            if meta.input.peek(syn::token::Paren) {
                let content;
                syn::parenthesized!(content in meta.input);
                let _: proc_macro2::TokenStream = content.parse()?;
            }
            Ok(())
        })?;
    }
    Ok(stable)
}

/// Derive macro for host records that embed an intrusive link.
///
/// The struct must be `#[repr(C)]` and its first field must be
/// `link: DoubleLink` or `link: AtomicLink`, which puts the link at offset
/// zero. An optional field named `data` becomes the payload exposed through
/// `NodeWithData`.
#[proc_macro_derive(Node, attributes(node))]
pub fn node_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let struct_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    // Find absolute crate path
    let mut crate_path = quote! { ::mola_intrusive };

    for attr in &input.attrs {
        if attr.path().is_ident("node") {
            match attr.parse_args::<NodeAttribute>() {
                Ok(node_attr) => {
                    let path = node_attr.crate_path;
                    crate_path = quote! { #path };
                    break;
                }
                Err(e) => return e.to_compile_error().into(),
            }
        }
    }

    match has_stable_layout(&input.attrs) {
        Ok(true) => {}
        Ok(false) => {
            return syn::Error::new_spanned(
                struct_name,
                "Node derive macro requires #[repr(C)] or #[repr(transparent)]",
            )
            .to_compile_error()
            .into();
        }
        Err(e) => return e.to_compile_error().into(),
    }

    let intrusive_path = quote! { #crate_path::linked_list::intrusive };

    let fields = if let Data::Struct(DataStruct {
        fields: Fields::Named(ref fields),
        ..
    }) = input.data
    {
        fields
    } else {
        return syn::Error::new_spanned(
            &input,
            "Node derive macro only supports structs with named fields",
        )
        .to_compile_error()
        .into();
    };

    let link_field = match fields.named.first() {
        Some(field) if field.ident.as_ref().is_some_and(|ident| ident == "link") => field,
        _ => {
            return syn::Error::new_spanned(
                struct_name,
                "The first field must be named 'link' so that it sits at offset zero",
            )
            .to_compile_error()
            .into();
        }
    };
    let data_field = fields
        .named
        .iter()
        .find(|field| field.ident.as_ref().is_some_and(|ident| ident == "data"));
    let link_type = &link_field.ty;

    let type_ident = if let Type::Path(TypePath { path, .. }) = link_type {
        match path.segments.last() {
            Some(segment) => segment.ident.clone(),
            None => {
                return syn::Error::new_spanned(link_type, "Field 'link' has an empty type path")
                    .to_compile_error()
                    .into();
            }
        }
    } else {
        return syn::Error::new_spanned(link_type, "Field 'link' must be a link type")
            .to_compile_error()
            .into();
    };

    let link_path = match type_ident.to_string().as_str() {
        "DoubleLink" => quote! { #intrusive_path::double::DoubleLink },
        "AtomicLink" => quote! { #intrusive_path::atomic::AtomicLink },
        _ => {
            return syn::Error::new_spanned(
                type_ident,
                "Field 'link' must be one of 'DoubleLink' or 'AtomicLink'",
            )
            .to_compile_error()
            .into();
        }
    };

    // Generate `Node` trait implementation
    let node_impl = quote! {
        unsafe impl #impl_generics #intrusive_path::traits::Node for #struct_name #ty_generics #where_clause {
            type Link = #link_path;

            #[inline]
            fn link(&self) -> &Self::Link {
                &self.link
            }
        }
    };

    // Generic types cannot be named from a `const` item, only check concrete records.
    let offset_check = if input.generics.params.is_empty() {
        quote! {
            const _: () = ::core::assert!(::core::mem::offset_of!(#struct_name, link) == 0);
        }
    } else {
        quote! {}
    };

    // Generate `NodeWithData` trait implementation if `data` field exists
    let data_impl = if let Some(data_field) = data_field {
        let data_type = &data_field.ty;
        quote! {
            impl #impl_generics #intrusive_path::traits::NodeWithData for #struct_name #ty_generics #where_clause {
                type Data = #data_type;

                #[inline]
                fn data(&self) -> &Self::Data {
                    &self.data
                }

                #[inline]
                fn data_mut(&mut self) -> &mut Self::Data {
                    &mut self.data
                }
            }
        }
    } else {
        quote! {}
    };

    let expanded = quote! {
        #node_impl
        #offset_check
        #data_impl
    };

    TokenStream::from(expanded)
}
