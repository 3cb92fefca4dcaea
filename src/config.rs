//! Configuration recognised at initialization: target syntax, ABI variant,
//! PIC/TLS model selection, and codegen/debug-info toggles.

use crate::codegen::xasmgen::Syntax;

/// The only ABI variant this core supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbiVariant {
    #[default]
    SystemV,
}

/// Top-level configuration for a compilation run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Always an `x86_64`/`sysv`-family triple; kept as a real
    /// `target_lexicon::Triple` rather than a bare string so the
    /// architecture/OS/environment components stay structured and
    /// comparable (this core's own teacher-aligned dependency choice
    /// for target identification).
    pub triple: target_lexicon::Triple,
    pub syntax: Syntax,
    pub abi_variant: AbiVariant,
    pub position_independent_code: bool,
    pub emulated_tls: bool,
    pub emit_comments: bool,
    pub emit_indentation: bool,
    pub optimization_level: u8,
    pub debug_info: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            triple: target_lexicon::Triple {
                architecture: target_lexicon::Architecture::X86_64,
                vendor: target_lexicon::Vendor::Unknown,
                operating_system: target_lexicon::OperatingSystem::Linux,
                environment: target_lexicon::Environment::Gnu,
                binary_format: target_lexicon::BinaryFormat::Elf,
            },
            syntax: Syntax::IntelNoPrefix,
            abi_variant: AbiVariant::SystemV,
            position_independent_code: false,
            emulated_tls: false,
            emit_comments: true,
            emit_indentation: true,
            optimization_level: 1,
            debug_info: false,
        }
    }
}

/// Builder for [`Config`]; every setter mirrors a field 1:1.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder(Config::default())
    }

    pub fn syntax(mut self, syntax: Syntax) -> Self {
        self.0.syntax = syntax;
        self
    }

    pub fn triple(mut self, triple: target_lexicon::Triple) -> Self {
        self.0.triple = triple;
        self
    }

    pub fn abi_variant(mut self, variant: AbiVariant) -> Self {
        self.0.abi_variant = variant;
        self
    }

    pub fn position_independent_code(mut self, v: bool) -> Self {
        self.0.position_independent_code = v;
        self
    }

    pub fn emulated_tls(mut self, v: bool) -> Self {
        self.0.emulated_tls = v;
        self
    }

    pub fn emit_comments(mut self, v: bool) -> Self {
        self.0.emit_comments = v;
        self
    }

    pub fn emit_indentation(mut self, v: bool) -> Self {
        self.0.emit_indentation = v;
        self
    }

    pub fn optimization_level(mut self, level: u8) -> Self {
        self.0.optimization_level = level;
        self
    }

    pub fn debug_info(mut self, v: bool) -> Self {
        self.0.debug_info = v;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_amd64_sysv_conventions() {
        let cfg = Config::default();
        assert_eq!(cfg.triple.architecture, target_lexicon::Architecture::X86_64);
        assert_eq!(cfg.syntax, Syntax::IntelNoPrefix);
        assert_eq!(cfg.abi_variant, AbiVariant::SystemV);
        assert!(!cfg.position_independent_code);
        assert!(!cfg.emulated_tls);
        assert!(cfg.emit_comments);
        assert!(cfg.emit_indentation);
        assert_eq!(cfg.optimization_level, 1);
        assert!(!cfg.debug_info);
    }

    #[test]
    fn builder_overrides_fields() {
        let cfg = ConfigBuilder::new()
            .syntax(Syntax::Att)
            .position_independent_code(true)
            .optimization_level(2)
            .build();
        assert_eq!(cfg.syntax, Syntax::Att);
        assert!(cfg.position_independent_code);
        assert_eq!(cfg.optimization_level, 2);
    }
}
