// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `bulwark fingerprint`: map a credential to the fingerprint that appears in
//! security logs, so an operator can find a caller's events without the raw
//! token ever being logged.
//!
//! The credential is read from stdin to keep it out of shell history.

use anyhow::{Context, Result};
use std::io::Read;

use bulwark_core::domain::identity::IdentityFingerprint;

pub fn handle_command() -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read credential from stdin")?;
    println!("{}", fingerprint(&input)?);
    Ok(())
}

/// Fingerprint a credential, tolerating a `Bearer ` prefix and surrounding whitespace.
pub fn fingerprint(input: &str) -> Result<IdentityFingerprint> {
    let trimmed = input.trim();
    let credential = match trimmed.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if trimmed.eq_ignore_ascii_case("bearer") => "",
        _ => trimmed,
    };
    if credential.is_empty() {
        anyhow::bail!("No credential provided on stdin");
    }
    Ok(IdentityFingerprint::from_credential(credential))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_matches_gate_derivation() {
        let expected = IdentityFingerprint::from_credential("abc.def.ghi");
        assert_eq!(fingerprint("abc.def.ghi\n").unwrap(), expected);
        assert_eq!(fingerprint("Bearer abc.def.ghi").unwrap(), expected);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(fingerprint("  \n").is_err());
        assert!(fingerprint("Bearer   ").is_err());
    }
}
