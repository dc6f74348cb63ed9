//! Request types for the maintenance CLI
//!
//! Turns textual key arguments into structured cache keys.

use crate::cache::{CacheKey, KeyPart};

/// A cache key as given on the command line: a computation name followed by
/// its arguments.
///
/// # Argument syntax
/// - `s:<text>` string, `i:<n>` signed integer, `u:<n>` unsigned integer,
///   `f:<x>` float, `b:<true|false>` boolean, `x:<hex>` raw bytes
/// - without a prefix, values that parse as `i64` are integers and
///   everything else is a string
#[derive(Debug, Clone, Default)]
pub struct KeySpec {
    /// Name of the cached computation
    pub name: String,
    /// Positional arguments
    pub args: Vec<String>,
}

impl KeySpec {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.name.is_empty() {
            return Some("Key name cannot be empty".to_string());
        }
        self.args.iter().find_map(|arg| parse_part(arg).err())
    }

    /// Builds the structured key.
    pub fn to_key(&self) -> Result<CacheKey, String> {
        if let Some(error) = self.validate() {
            return Err(error);
        }
        self.args
            .iter()
            .try_fold(CacheKey::new(self.name.clone()), |key, arg| {
                Ok(key.with(parse_part(arg)?))
            })
    }
}

/// Parses one argument using the prefix syntax described on [`KeySpec`].
pub fn parse_part(arg: &str) -> Result<KeyPart, String> {
    let invalid = |kind: &str| format!("invalid {kind} key argument: {arg}");
    match arg.split_once(':') {
        Some(("s", text)) => Ok(KeyPart::Str(text.to_string())),
        Some(("i", n)) => n.parse::<i64>().map(KeyPart::Int).map_err(|_| invalid("integer")),
        Some(("u", n)) => n.parse::<u64>().map(KeyPart::UInt).map_err(|_| invalid("unsigned")),
        Some(("f", x)) => x.parse::<f64>().map(KeyPart::float).map_err(|_| invalid("float")),
        Some(("b", b)) => b.parse::<bool>().map(KeyPart::Bool).map_err(|_| invalid("boolean")),
        Some(("x", h)) => hex::decode(h).map(KeyPart::Bytes).map_err(|_| invalid("hex")),
        _ => Ok(arg
            .parse::<i64>()
            .map(KeyPart::Int)
            .unwrap_or_else(|_| KeyPart::Str(arg.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untyped_arguments() {
        let key = KeySpec::new("getCtRawCandidate", vec!["1.2.840.1".into(), "7".into()])
            .to_key()
            .unwrap();
        assert_eq!(
            key,
            CacheKey::new("getCtRawCandidate").with("1.2.840.1").with(7i64)
        );
    }

    #[test]
    fn test_prefixed_arguments() {
        let key = KeySpec::new(
            "f",
            vec!["s:7".into(), "u:3".into(), "b:true".into(), "x:00ff".into()],
        )
        .to_key()
        .unwrap();
        assert_eq!(
            key.parts()[1..],
            [
                KeyPart::Str("7".into()),
                KeyPart::UInt(3),
                KeyPart::Bool(true),
                KeyPart::Bytes(vec![0, 255])
            ]
        );
    }

    #[test]
    fn test_float_matches_library_key() {
        let key = KeySpec::new("f", vec!["f:0.5".into()]).to_key().unwrap();
        assert_eq!(key, CacheKey::new("f").with(0.5f64));
    }

    #[test]
    fn test_validation_errors() {
        assert!(KeySpec::new("", vec![]).validate().is_some());
        assert!(KeySpec::new("f", vec!["u:-1".into()]).validate().is_some());
        assert!(KeySpec::new("f", vec!["x:zz".into()]).to_key().is_err());
        assert!(KeySpec::new("f", vec!["plain".into()]).validate().is_none());
    }
}
