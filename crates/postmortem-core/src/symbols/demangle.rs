//! Symbol demangling utilities.
//!
//! Names come out of symbol tables and DWARF in mangled form. This module
//! turns them into [`SymbolName`] values carrying both the raw and the
//! human-readable spelling, plus a language guess:
//!
//! - **Rust**: legacy (`_ZN...E` with a hash suffix) and v0 (`_R...`) manglings,
//!   demangled by `rustc_demangle` with the hash suffix dropped
//! - **C++**: Itanium `_Z` names that `rustc_demangle` does not accept; kept raw
//! - **C**: everything else

use rustc_demangle::try_demangle;

use crate::types::{SymbolLanguage, SymbolName};

/// Build a [`SymbolName`] from a raw linkage name.
pub(crate) fn make_symbol_name(raw: String) -> SymbolName
{
    if let Ok(demangled) = try_demangle(&raw) {
        // `{:#}` omits the trailing `::h0123...` disambiguator.
        let readable = format!("{demangled:#}");
        return SymbolName::new(raw, Some(readable), SymbolLanguage::Rust);
    }

    let language = if raw.starts_with("_Z") {
        SymbolLanguage::Cpp
    } else if raw.is_empty() {
        SymbolLanguage::Unknown
    } else {
        SymbolLanguage::C
    };
    SymbolName::new(raw, None, language)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn legacy_rust_names_lose_their_hash()
    {
        let name = make_symbol_name("_ZN4core9panicking5panic17h0123456789abcdefE".to_string());
        assert_eq!(name.language(), SymbolLanguage::Rust);
        assert_eq!(name.display_name(), "core::panicking::panic");
    }

    #[test]
    fn itanium_names_stay_raw()
    {
        let name = make_symbol_name("_Z3foov".to_string());
        assert_eq!(name.language(), SymbolLanguage::Cpp);
        assert_eq!(name.display_name(), "_Z3foov");
    }

    #[test]
    fn plain_names_are_c()
    {
        let name = make_symbol_name("memcpy".to_string());
        assert_eq!(name.language(), SymbolLanguage::C);
        assert_eq!(name.demangled(), None);
    }
}
