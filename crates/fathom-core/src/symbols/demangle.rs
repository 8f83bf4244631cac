//! Symbol demangling.
//!
//! Rust symbols (`_R...` v0 and legacy `_ZN...`) are demangled with
//! `rustc-demangle`, hash suffix stripped. Anything else (plain C names) is
//! returned unchanged.

use rustc_demangle::try_demangle;

/// Human-readable form of a symbol name
///
/// ## Example
///
/// ```rust
/// use fathom_core::symbols::demangle;
///
/// assert_eq!(demangle("main"), "main");
/// assert_eq!(demangle("_ZN4core3ptr13drop_in_place17h0123456789abcdefE"), "core::ptr::drop_in_place");
/// ```
#[must_use]
pub fn demangle(raw: &str) -> String
{
    match try_demangle(raw) {
        Ok(demangled) => format!("{demangled:#}"),
        Err(_) => raw.to_string(),
    }
}

/// Whether a function called `wanted` by the user is the one DWARF names
/// `name` (or `linkage_name`)
pub(crate) fn function_names_match(wanted: &str, name: &str, linkage_name: Option<&str>) -> bool
{
    if name == wanted {
        return true;
    }
    let Some(linkage_name) = linkage_name else {
        return false;
    };
    if linkage_name == wanted {
        return true;
    }
    let demangled = demangle(linkage_name);
    demangled == wanted || demangled.ends_with(&format!("::{wanted}"))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_demangle_passes_c_names_through()
    {
        assert_eq!(demangle("main"), "main");
        assert_eq!(demangle("type_z_init"), "type_z_init");
    }

    #[test]
    fn test_demangle_strips_rust_hash()
    {
        assert_eq!(demangle("_ZN3foo3bar17h05af221e174051e9E"), "foo::bar");
    }

    #[test]
    fn test_function_names_match()
    {
        assert!(function_names_match("main", "main", None));
        assert!(!function_names_match("main", "other", None));
        assert!(function_names_match("bar", "bar::{{closure}}", Some("_ZN3foo3bar17h05af221e174051e9E")));
        assert!(function_names_match("foo::bar", "x", Some("_ZN3foo3bar17h05af221e174051e9E")));
    }
}
