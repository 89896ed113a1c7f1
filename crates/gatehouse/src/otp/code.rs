//! Verification code generation.

use rand::Rng;

use warden_common::constants::CODE_DIGITS;

/// Produces fixed-width numeric codes from the OS-seeded CSPRNG.
///
/// `rand::rng()` reseeds from the operating system, so consecutive codes
/// are not derivable from one another.
#[derive(Clone, Copy, Default)]
pub struct CodeGenerator;

impl CodeGenerator {
    /// A fresh 6-digit code, uniform over [000000, 999999], leading zeros
    /// included.
    pub fn generate(&self) -> String {
        let n = rand::rng().random_range(0..1_000_000u32);
        format!("{n:0width$}", width = CODE_DIGITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_exactly_six_digits() {
        let generator = CodeGenerator;
        for _ in 0..200 {
            let code = generator.generate();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn small_values_keep_leading_zeros() {
        assert_eq!(format!("{:0width$}", 42u32, width = CODE_DIGITS), "000042");
    }
}
