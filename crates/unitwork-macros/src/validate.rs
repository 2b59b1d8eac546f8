//! Compile-time validation for the Entity derive macro.
//!
//! All problems are collected and reported together, each pointing at the
//! offending field.

use std::collections::HashSet;

use syn::Error;

use crate::parse::EntityDef;

/// Validate a parsed entity definition.
pub fn validate_entity(entity: &EntityDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    if entity.table_name.trim().is_empty() {
        errors.push(Error::new(entity.name.span(), "table name must not be empty"));
    }

    if entity.mapped_fields().next().is_none() {
        errors.push(Error::new(
            entity.name.span(),
            "Entity must map at least one field",
        ));
    }

    let mut seen = HashSet::new();
    for field in entity.mapped_fields() {
        if !seen.insert(field.column_name.as_str()) {
            errors.push(Error::new(
                field.name.span(),
                format!("duplicate column name '{}'", field.column_name),
            ));
        }
    }

    let ids: Vec<_> = entity.fields.iter().filter(|f| f.id).collect();
    for extra in ids.iter().skip(1) {
        errors.push(Error::new(
            extra.name.span(),
            format!("{} has more than one id field", entity.name),
        ));
    }

    for field in &entity.fields {
        if field.generated && !field.id {
            errors.push(Error::new(
                field.name.span(),
                "`generated` is only valid on the id field",
            ));
        }
        if field.skip && (field.id || field.generated) {
            errors.push(Error::new(
                field.name.span(),
                "the id field cannot be skipped",
            ));
        }
    }

    let mut errors = errors.into_iter();
    match errors.next() {
        None => Ok(()),
        Some(mut combined) => {
            for err in errors {
                combined.combine(err);
            }
            Err(combined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_entity;
    use syn::{DeriveInput, parse_quote};

    fn check(input: DeriveInput) -> Result<(), Error> {
        validate_entity(&parse_entity(&input)?)
    }

    #[test]
    fn test_valid_entity() {
        assert!(
            check(parse_quote! {
                struct Product { #[entity(id, generated)] id: Option<i64>, name: String }
            })
            .is_ok()
        );
    }

    #[test]
    fn test_duplicate_columns() {
        let err = check(parse_quote! {
            struct Product { #[entity(id)] id: i64, name: String, #[entity(column = "name")] title: String }
        })
        .unwrap_err();
        assert!(err.to_string().contains("duplicate column name 'name'"));
    }

    #[test]
    fn test_multiple_ids() {
        let err = check(parse_quote! {
            struct Pair { #[entity(id)] a: i64, #[entity(id)] b: i64 }
        })
        .unwrap_err();
        assert!(err.to_string().contains("more than one id field"));
    }

    #[test]
    fn test_generated_requires_id() {
        assert!(
            check(parse_quote! {
                struct Product { #[entity(id)] id: i64, #[entity(generated)] seq: i64 }
            })
            .is_err()
        );
    }

    #[test]
    fn test_all_fields_skipped() {
        assert!(
            check(parse_quote! {
                struct Empty { #[entity(skip)] scratch: u8 }
            })
            .is_err()
        );
    }
}
