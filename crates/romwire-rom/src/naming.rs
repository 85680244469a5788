//! Wire naming convention.
//!
//! Rust code is snake_case; the wire is lowerCamelCase (`get_att3` is
//! the operation `getAtt3`, the field `min_bitrate` is the property
//! `minBitrate`). The mapping macros call [`property_name`] so both sides
//! agree without per-type tables.

/// Converts a snake_case identifier to lowerCamelCase.
///
/// A leading `r#` (raw identifier) is dropped. Identifiers that are
/// already camelCase pass through unchanged.
pub fn property_name(ident: &str) -> String {
    let ident = ident.strip_prefix("r#").unwrap_or(ident);
    let mut out = String::with_capacity(ident.len());
    let mut upper_next = false;
    for ch in ident.chars() {
        if ch == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// The class name encoded in a server-minted reference.
///
/// References look like `<token>_<Class>`; a composite reference
/// (`<scope>/<token>_<Class>`) is read from its last segment. Returns
/// `None` for opaque references that don't follow the pattern.
pub fn class_of_reference(reference: &str) -> Option<&str> {
    let last = reference.rsplit('/').next()?;
    let (_, class) = last.rsplit_once('_')?;
    (!class.is_empty()).then_some(class)
}
