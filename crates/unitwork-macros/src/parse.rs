//! Parsing logic for the Entity derive macro.
//!
//! This module extracts struct-level and field-level `#[entity(...)]`
//! attributes from the derive input to build `EntityDef` and `FieldDef`
//! structures used for code generation.

use proc_macro2::Span;
use syn::{Attribute, Data, DeriveInput, Error, Field, Fields, Ident, Lit, Result, Type};

/// Parsed entity definition from a struct with `#[derive(Entity)]`.
#[derive(Debug)]
pub struct EntityDef {
    /// The struct name (e.g., `Product`).
    pub name: Ident,
    /// The SQL table name (e.g., `"products"`).
    pub table_name: String,
    /// Parsed field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
}

/// Parsed field definition from a struct field.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    pub column_name: String,
    pub ty: Type,
    pub id: bool,
    pub generated: bool,
    pub skip: bool,
}

impl EntityDef {
    /// Fields that map to a column.
    pub fn mapped_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.skip)
    }

    /// Fields left out of mapping.
    pub fn skipped_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.skip)
    }
}

/// Parse a derive input into an entity definition.
pub fn parse_entity(input: &DeriveInput) -> Result<EntityDef> {
    let name = input.ident.clone();

    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Entity cannot be derived for generic structs",
        ));
    }

    let table_name = parse_struct_attrs(&input.attrs)?
        .unwrap_or_else(|| derive_table_name(&name.to_string()));

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not unions",
            ));
        }
    };

    Ok(EntityDef {
        name,
        table_name,
        fields,
    })
}

/// Parse struct-level `#[entity(table = "...")]`.
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<Option<String>> {
    let mut table_name: Option<String> = None;

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: Lit = meta.value()?.parse()?;
                let Lit::Str(lit_str) = value else {
                    return Err(Error::new_spanned(value, "expected string literal"));
                };
                if table_name.is_some() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "duplicate entity attribute: table",
                    ));
                }
                table_name = Some(lit_str.value());
                Ok(())
            } else {
                Err(meta.error("unknown entity attribute; expected `table = \"...\"`"))
            }
        })?;
    }

    Ok(table_name)
}

/// Derive the default table name: snake_case, pluralised.
///
/// Examples:
/// - `Product` -> `products`
/// - `OrderLine` -> `order_lines`
/// - `Category` -> `categories`
fn derive_table_name(struct_name: &str) -> String {
    pluralize(&to_snake_case(struct_name))
}

/// Convert PascalCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                // word boundary, or the last capital of an acronym before a new word
                if prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next.is_some_and(char::is_lowercase))
                {
                    result.push('_');
                }
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Simple English pluralization.
fn pluralize(word: &str) -> String {
    match word {
        "person" => return "people".to_string(),
        "child" => return "children".to_string(),
        "man" => return "men".to_string(),
        "woman" => return "women".to_string(),
        "datum" => return "data".to_string(),
        _ => {}
    }

    if word.is_empty() {
        return String::new();
    }

    let ends_with_any = |suffixes: &[&str]| suffixes.iter().any(|s| word.ends_with(s));
    if ends_with_any(&["s", "x", "z", "ch", "sh"]) {
        return format!("{word}es");
    }

    if let Some(stem) = word.strip_suffix('y') {
        if stem.chars().last().is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{stem}ies");
        }
    }

    format!("{word}s")
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with fields, not a unit struct",
        )),
    }
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;

    let mut def = FieldDef {
        column_name: name.to_string().trim_start_matches("r#").to_string(),
        name,
        ty: field.ty.clone(),
        id: false,
        generated: false,
        skip: false,
    };

    for attr in &field.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                def.id = true;
            } else if meta.path.is_ident("generated") {
                def.generated = true;
            } else if meta.path.is_ident("skip") {
                def.skip = true;
            } else if meta.path.is_ident("column") {
                let value: Lit = meta.value()?.parse()?;
                let Lit::Str(lit_str) = value else {
                    return Err(Error::new_spanned(value, "expected string literal"));
                };
                def.column_name = lit_str.value();
            } else {
                return Err(meta.error(
                    "unknown entity attribute; expected one of `id`, `generated`, `column`, `skip`",
                ));
            }
            Ok(())
        })?;
    }

    Ok(def)
}
