//! Procedural macros for the unitwork session engine.
//!
//! `#[derive(Entity)]` turns a struct with named fields into a mapped entity
//! by generating its static `FieldInfo` table and the row conversions the
//! session needs. Generated code refers to `::unitwork_core`, so crates using
//! the derive depend on `unitwork-core` directly.

use proc_macro::TokenStream;
use quote::quote;

mod parse;
mod validate;

use parse::{EntityDef, parse_entity};

/// Derive macro for the `Entity` trait.
///
/// # Attributes
///
/// - `#[entity(table = "name")]` - Override table name (defaults to the snake_case, pluralised struct name)
/// - `#[entity(id)]` - Mark the id field
/// - `#[entity(generated)]` - The database assigns the id on insert
/// - `#[entity(column = "name")]` - Override column name
/// - `#[entity(skip)]` - Leave the field out of mapping; it must implement `Default`
///
/// # Example
///
/// ```ignore
/// use unitwork::Entity;
///
/// #[derive(Entity)]
/// #[entity(table = "products")]
/// struct Product {
///     #[entity(id, generated)]
///     id: Option<i64>,
///     name: String,
///     price: f64,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let entity = match parse_entity(&input) {
        Ok(e) => e,
        Err(e) => return e.to_compile_error().into(),
    };

    if let Err(e) = validate::validate_entity(&entity) {
        return e.to_compile_error().into();
    }

    generate_entity_impl(&entity).into()
}

fn generate_entity_impl(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let table_name = &entity.table_name;
    let entity_name = name.to_string();

    let field_infos = generate_field_infos(entity);
    let to_row = generate_to_row(entity);
    let from_row = generate_from_row(entity);
    let set_column = generate_set_column(entity);

    quote! {
        impl ::unitwork_core::Entity for #name {
            const TABLE_NAME: &'static str = #table_name;
            const ENTITY_NAME: &'static str = #entity_name;

            fn fields() -> &'static [::unitwork_core::FieldInfo] {
                static FIELDS: &[::unitwork_core::FieldInfo] = &[#(#field_infos),*];
                FIELDS
            }

            fn to_row(&self) -> ::std::vec::Vec<(&'static str, ::unitwork_core::Value)> {
                #to_row
            }

            fn from_row(row: &::unitwork_core::Row) -> ::unitwork_core::Result<Self> {
                #from_row
            }

            fn set_column(
                &mut self,
                column: &str,
                value: ::unitwork_core::Value,
            ) -> ::unitwork_core::Result<()> {
                #set_column
            }
        }
    }
}

fn generate_field_infos(entity: &EntityDef) -> Vec<proc_macro2::TokenStream> {
    entity
        .mapped_fields()
        .map(|field| {
            let field_name = field.name.to_string();
            let field_name = field_name.trim_start_matches("r#");
            let column_name = &field.column_name;
            let ty = &field.ty;
            let id = field.id;
            let generated = field.generated;
            quote! {
                ::unitwork_core::FieldInfo::new(
                    #field_name,
                    #column_name,
                    <#ty as ::unitwork_core::TypeInfo>::SQL_TYPE,
                )
                .nullable(<#ty as ::unitwork_core::TypeInfo>::NULLABLE)
                .id(#id)
                .generated(#generated)
            }
        })
        .collect()
}

fn generate_to_row(entity: &EntityDef) -> proc_macro2::TokenStream {
    let conversions = entity.mapped_fields().map(|field| {
        let field_name = &field.name;
        let column_name = &field.column_name;
        quote! {
            (#column_name, ::unitwork_core::Value::from(::std::clone::Clone::clone(&self.#field_name)))
        }
    });

    quote! {
        vec![#(#conversions),*]
    }
}

fn generate_from_row(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let extractions = entity.mapped_fields().map(|field| {
        let field_name = &field.name;
        let column_name = &field.column_name;
        quote! { #field_name: row.get_named(#column_name)? }
    });
    let defaults = entity.skipped_fields().map(|field| {
        let field_name = &field.name;
        quote! { #field_name: ::std::default::Default::default() }
    });

    quote! {
        Ok(#name {
            #(#extractions,)*
            #(#defaults,)*
        })
    }
}

fn generate_set_column(entity: &EntityDef) -> proc_macro2::TokenStream {
    let arms = entity.mapped_fields().map(|field| {
        let field_name = &field.name;
        let column_name = &field.column_name;
        quote! {
            #column_name => self.#field_name = ::unitwork_core::FromValue::from_value(&value)?,
        }
    });

    quote! {
        match column {
            #(#arms)*
            other => {
                return Err(::unitwork_core::entity::unknown_column::<Self>(other));
            }
        }
        Ok(())
    }
}
