//! Environment variable name validation.
//!
//! An effective name (envFrom prefix + key) must be a C identifier to be
//! projected into a container environment: `[A-Za-z_][A-Za-z0-9_]*`.
//! Keys failing this are skipped and reported, never silently mangled.

/// Whether `name` is a legal environment variable name.
pub fn is_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
