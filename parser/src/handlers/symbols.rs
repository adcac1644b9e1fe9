//! Symbol-table section handler and the demangling collaborator seam

use std::collections::HashSet;

use sightline_shared::format::codec::{decode_symbol, RawRecord};
use sightline_shared::format::SectionKind;
use sightline_shared::types::records::SymbolEntry;

use super::{DataHandler, HandlerOutput, SkipReason};

/// External demangling collaborator.
///
/// Injected when the model is built; the parser itself never interprets
/// mangled names.
pub trait Demangler {
    /// Return the display name for a mangled symbol, or None to keep the
    /// mangled form
    fn demangle(&self, mangled: &str) -> Option<String>;
}

/// Keeps every symbol in its mangled form
pub struct PassthroughDemangler;

impl Demangler for PassthroughDemangler {
    fn demangle(&self, _mangled: &str) -> Option<String> {
        None
    }
}

/// Accumulates the address-to-mangled-name entries of the symbol section
pub struct SymbolTableHandler {
    entries: Vec<SymbolEntry>,
    seen_addresses: HashSet<u64>,
}

impl SymbolTableHandler {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            seen_addresses: HashSet::new(),
        }
    }
}

impl Default for SymbolTableHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DataHandler for SymbolTableHandler {
    fn section_kind(&self) -> SectionKind {
        SectionKind::Symbol
    }

    fn parse_record(&mut self, raw: &RawRecord) -> Result<(), SkipReason> {
        let entry = decode_symbol(raw)?;
        if !self.seen_addresses.insert(entry.address) {
            return Err(SkipReason::Invalid(format!(
                "duplicate symbol address {:#x}",
                entry.address
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> HandlerOutput {
        HandlerOutput::Symbols(self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_shared::format::codec::encode_symbol;

    fn raw(line: &str) -> RawRecord {
        RawRecord::from_line(1, line).unwrap()
    }

    #[test]
    fn test_duplicate_address_skipped() {
        let mut handler = SymbolTableHandler::new();
        let entry = SymbolEntry {
            address: 0x1000,
            mangled: "_Zm".into(),
            demangled: None,
        };
        handler.parse_record(&raw(&encode_symbol(&entry))).unwrap();
        let err = handler
            .parse_record(&raw(&encode_symbol(&entry)))
            .unwrap_err();
        assert!(matches!(err, SkipReason::Invalid(_)));
    }

    #[test]
    fn test_passthrough_demangler() {
        assert_eq!(PassthroughDemangler.demangle("_ZN3fooEv"), None);
    }
}
