//! The rigid transformation aligning a match's source fragment onto its target.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("expected 16 values, found {0}")]
    WrongCount(usize),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
}

/// Row-major 4x4 matrix. Serialized as 16 space-separated numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform([f64; 16]);

impl Transform {
    pub const IDENTITY: Transform = Transform([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn new(values: [f64; 16]) -> Self {
        Transform(values)
    }

    /// Pure translation by `(x, y, z)`.
    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut m = Self::IDENTITY.0;
        m[3] = x;
        m[7] = y;
        m[11] = z;
        Transform(m)
    }

    pub fn values(&self) -> &[f64; 16] {
        &self.0
    }

    /// Element at `row`, `col` (both 0..4).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[row * 4 + col]
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

impl FromStr for Transform {
    type Err = TransformError;

    /// An empty string parses as the identity.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(Self::IDENTITY);
        }
        if parts.len() != 16 {
            return Err(TransformError::WrongCount(parts.len()));
        }
        let mut m = [0.0; 16];
        for (slot, part) in m.iter_mut().zip(parts) {
            *slot = part
                .parse()
                .map_err(|_| TransformError::InvalidNumber(part.to_string()))?;
        }
        Ok(Transform(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_identity() {
        assert_eq!("".parse::<Transform>().unwrap(), Transform::IDENTITY);
        assert!(Transform::default().is_identity());
    }

    #[test]
    fn parses_row_major() {
        let t: Transform = "1 0 0 5 0 1 0 6 0 0 1 7 0 0 0 1".parse().unwrap();
        assert_eq!(t, Transform::translation(5.0, 6.0, 7.0));
        assert_eq!(t.get(1, 3), 6.0);
        assert_eq!(t.to_string(), "1 0 0 5 0 1 0 6 0 0 1 7 0 0 0 1");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            "1 2 3".parse::<Transform>(),
            Err(TransformError::WrongCount(3))
        );
        let bad = "1 0 0 x 0 1 0 0 0 0 1 0 0 0 0 1".parse::<Transform>();
        assert_eq!(bad, Err(TransformError::InvalidNumber("x".to_string())));
    }
}
