//! Obfuscation method catalog
//!
//! Every method the external obfuscator understands occupies one bit of a
//! bitkey. The built-in catalog is a closed enumeration; custom registries
//! can be assembled from explicit records (mostly useful for tests and for
//! pointing the pipeline at a fork of the obfuscator with other switches).

use serde::{Deserialize, Serialize};

use crate::error::{HerculesError, Result};

/// Largest registry width accepted; the selector keeps a table of `2^width` entries.
pub const MAX_REGISTRY_WIDTH: usize = 16;

/// Methods shipped with the Hercules obfuscator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinMethod {
    ControlFlow,
    VariableRenaming,
    GarbageCode,
    OpaquePredicates,
    BytecodeEncoding,
}

impl BuiltinMethod {
    /// All built-in methods in ascending bit order
    pub const ALL: [BuiltinMethod; 5] = [
        BuiltinMethod::ControlFlow,
        BuiltinMethod::VariableRenaming,
        BuiltinMethod::GarbageCode,
        BuiltinMethod::OpaquePredicates,
        BuiltinMethod::BytecodeEncoding,
    ];

    pub fn key(self) -> &'static str {
        match self {
            BuiltinMethod::ControlFlow => "control_flow",
            BuiltinMethod::VariableRenaming => "variable_renaming",
            BuiltinMethod::GarbageCode => "garbage_code",
            BuiltinMethod::OpaquePredicates => "opaque_predicates",
            BuiltinMethod::BytecodeEncoding => "bytecode_encoding",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            BuiltinMethod::ControlFlow => "Control Flow",
            BuiltinMethod::VariableRenaming => "Variable Renaming",
            BuiltinMethod::GarbageCode => "Garbage Code",
            BuiltinMethod::OpaquePredicates => "Opaque Predicates",
            BuiltinMethod::BytecodeEncoding => "Bytecode Encoding",
        }
    }

    pub fn bit(self) -> u32 {
        match self {
            BuiltinMethod::ControlFlow => 0,
            BuiltinMethod::VariableRenaming => 1,
            BuiltinMethod::GarbageCode => 2,
            BuiltinMethod::OpaquePredicates => 3,
            BuiltinMethod::BytecodeEncoding => 4,
        }
    }

    /// Whether a UI should pre-select this method. Never consulted by resolution.
    pub fn default_enabled(self) -> bool {
        match self {
            BuiltinMethod::ControlFlow
            | BuiltinMethod::VariableRenaming
            | BuiltinMethod::GarbageCode => true,
            BuiltinMethod::OpaquePredicates | BuiltinMethod::BytecodeEncoding => false,
        }
    }
}

impl From<BuiltinMethod> for Method {
    fn from(method: BuiltinMethod) -> Self {
        Method {
            key: method.key().to_string(),
            name: method.display_name().to_string(),
            bit: method.bit(),
            default_enabled: method.default_enabled(),
        }
    }
}

/// A single toggleable transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Method {
    /// Stable identifier, also the command-line switch (`--<key>`)
    pub key: String,
    /// Human readable name
    pub name: String,
    /// Bit position inside a bitkey
    pub bit: u32,
    /// Informational default for UIs
    pub default_enabled: bool,
}

impl Method {
    pub fn new(key: &str, name: &str, bit: u32, default_enabled: bool) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            bit,
            default_enabled,
        }
    }

    /// Command-line switch passed to the obfuscator
    pub fn flag(&self) -> String {
        format!("--{}", self.key)
    }
}

/// Intensity modifier forwarded to the obfuscator independently of the bitkey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Minimal,
    Moderate,
    Maximum,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Minimal, Preset::Moderate, Preset::Maximum];

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Minimal => "minimal",
            Preset::Moderate => "moderate",
            Preset::Maximum => "maximum",
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            Preset::Minimal => "--minimal",
            Preset::Moderate => "--moderate",
            Preset::Maximum => "--maximum",
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown preset '{}' (expected minimal, moderate or maximum)", s))
    }
}

/// Immutable, ordered catalog of methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRegistry {
    methods: Vec<Method>,
}

impl MethodRegistry {
    /// Build a registry from explicit records.
    ///
    /// Records may arrive in any order; they are stored by ascending bit.
    /// Keys must be unique and non-empty, and bits must cover `0..width`
    /// exactly once.
    pub fn new(mut methods: Vec<Method>) -> Result<Self> {
        if methods.len() > MAX_REGISTRY_WIDTH {
            return Err(HerculesError::InvalidRegistry(format!(
                "{} methods exceed the maximum of {}",
                methods.len(),
                MAX_REGISTRY_WIDTH
            )));
        }

        methods.sort_by_key(|m| m.bit);

        for (expected, method) in methods.iter().enumerate() {
            if method.key.trim().is_empty() {
                return Err(HerculesError::InvalidRegistry(format!(
                    "method at bit {} has an empty key",
                    method.bit
                )));
            }
            if method.bit as usize != expected {
                return Err(HerculesError::InvalidRegistry(format!(
                    "bit positions must be dense and unique: expected bit {}, found {} for '{}'",
                    expected, method.bit, method.key
                )));
            }
        }

        for (i, method) in methods.iter().enumerate() {
            if methods[..i].iter().any(|other| other.key == method.key) {
                return Err(HerculesError::InvalidRegistry(format!(
                    "duplicate method key '{}'",
                    method.key
                )));
            }
        }

        Ok(Self { methods })
    }

    /// The catalog shipped with the Hercules obfuscator
    pub fn builtin() -> Self {
        Self {
            methods: BuiltinMethod::ALL.into_iter().map(Method::from).collect(),
        }
    }

    /// Methods in ascending bit order
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Number of methods, i.e. the number of meaningful bits in a bitkey
    pub fn width(&self) -> usize {
        self.methods.len()
    }

    pub fn max_bitkey(&self) -> i64 {
        (1i64 << self.width()) - 1
    }

    /// Look a method up by its display name
    pub fn find_by_name(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn find_by_key(&self, key: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.key == key)
    }

    /// Bitkey selecting every default-enabled method
    pub fn default_bitkey(&self) -> i64 {
        self.methods
            .iter()
            .filter(|m| m.default_enabled)
            .fold(0, |acc, m| acc | (1i64 << m.bit))
    }

    /// Bitkey selecting exactly the given method keys
    pub fn bitkey_for<S: AsRef<str>>(&self, keys: &[S]) -> Result<i64> {
        keys.iter().try_fold(0i64, |acc, key| {
            let key = key.as_ref();
            self.find_by_key(key)
                .map(|m| acc | (1i64 << m.bit))
                .ok_or_else(|| HerculesError::UnknownMethod(key.to_string()))
        })
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_layout() {
        let registry = MethodRegistry::builtin();
        assert_eq!(registry.width(), 5);
        assert_eq!(registry.max_bitkey(), 31);

        let keys: Vec<&str> = registry.methods().iter().map(|m| m.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "control_flow",
                "variable_renaming",
                "garbage_code",
                "opaque_predicates",
                "bytecode_encoding"
            ]
        );
        for (i, method) in registry.methods().iter().enumerate() {
            assert_eq!(method.bit as usize, i);
        }
    }

    #[test]
    fn test_builtin_passes_validation() {
        let records: Vec<Method> = BuiltinMethod::ALL.into_iter().map(Method::from).collect();
        let registry = MethodRegistry::new(records).unwrap();
        assert_eq!(registry, MethodRegistry::builtin());
    }

    #[test]
    fn test_find_by_name() {
        let registry = MethodRegistry::builtin();
        let method = registry.find_by_name("Garbage Code").unwrap();
        assert_eq!(method.key, "garbage_code");
        assert_eq!(method.bit, 2);
        assert!(registry.find_by_name("garbage_code").is_none());
        assert!(registry.find_by_name("Nonexistent").is_none());
    }

    #[test]
    fn test_find_by_key() {
        let registry = MethodRegistry::builtin();
        assert_eq!(registry.find_by_key("bytecode_encoding").unwrap().bit, 4);
        assert!(registry.find_by_key("Bytecode Encoding").is_none());
    }

    #[test]
    fn test_records_are_sorted_by_bit() {
        let registry = MethodRegistry::new(vec![
            Method::new("c", "C", 2, false),
            Method::new("a", "A", 0, true),
            Method::new("b", "B", 1, false),
        ])
        .unwrap();
        let keys: Vec<&str> = registry.methods().iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rejects_gap_in_bits() {
        let err = MethodRegistry::new(vec![
            Method::new("a", "A", 0, true),
            Method::new("c", "C", 2, false),
        ])
        .unwrap_err();
        assert!(matches!(err, HerculesError::InvalidRegistry(_)));
    }

    #[test]
    fn test_rejects_shared_bit() {
        let err = MethodRegistry::new(vec![
            Method::new("a", "A", 0, true),
            Method::new("b", "B", 0, false),
        ])
        .unwrap_err();
        assert!(matches!(err, HerculesError::InvalidRegistry(_)));
    }

    #[test]
    fn test_rejects_duplicate_key() {
        let err = MethodRegistry::new(vec![
            Method::new("a", "A", 0, true),
            Method::new("a", "Again", 1, false),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_oversized_registry() {
        let methods = (0..=MAX_REGISTRY_WIDTH as u32)
            .map(|bit| Method::new(&format!("m{}", bit), "M", bit, false))
            .collect();
        assert!(MethodRegistry::new(methods).is_err());
    }

    #[test]
    fn test_empty_registry() {
        let registry = MethodRegistry::new(Vec::new()).unwrap();
        assert_eq!(registry.width(), 0);
        assert_eq!(registry.max_bitkey(), 0);
    }

    #[test]
    fn test_default_bitkey() {
        let registry = MethodRegistry::builtin();
        assert_eq!(registry.default_bitkey(), 0b00111);
    }

    #[test]
    fn test_bitkey_for() {
        let registry = MethodRegistry::builtin();
        assert_eq!(
            registry.bitkey_for(&["control_flow", "garbage_code"]).unwrap(),
            0b101
        );
        assert_eq!(registry.bitkey_for::<&str>(&[]).unwrap(), 0);
        assert!(matches!(
            registry.bitkey_for(&["teleport"]),
            Err(HerculesError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_method_flag() {
        assert_eq!(Method::from(BuiltinMethod::ControlFlow).flag(), "--control_flow");
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("moderate".parse::<Preset>().unwrap(), Preset::Moderate);
        assert_eq!("MAXIMUM".parse::<Preset>().unwrap(), Preset::Maximum);
        assert!("extreme".parse::<Preset>().is_err());
        assert_eq!(Preset::Minimal.flag(), "--minimal");
    }

    #[test]
    fn test_preset_serialization() {
        let json = serde_json::to_string(&Preset::Moderate).unwrap();
        assert_eq!(json, "\"moderate\"");
    }
}
