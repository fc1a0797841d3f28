use rand::{CryptoRng, Rng, RngCore};
use std::fmt;

/// Key half of the TXT record a registrant has to publish
pub const CHALLENGE_KEY: &str = "yivi_verifier_challenge";

/// A minted DNS challenge token
///
/// The stored form is the full TXT record value the registrant is instructed
/// to publish, surrounding double quotes included:
/// `"yivi_verifier_challenge=<32 hex chars>"`. Comparison against resolved
/// records is exact text equality on that form, so the displayed instructions
/// and the verifier agree byte-for-byte.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Challenge(String);

impl Challenge {
    /// Wrap an already-persisted challenge value
    #[must_use]
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    /// Whether any of the resolved TXT record texts equals this challenge
    pub fn is_satisfied_by<'a, I>(&self, mut txt_records: I) -> bool
    where
        I: Iterator<Item = &'a str>,
    {
        txt_records.any(|record| record == self.0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Challenge> for String {
    fn from(value: Challenge) -> Self {
        value.0
    }
}

/// Mint a fresh challenge from a cryptographically secure random source
///
/// 128 bits of entropy; collisions are not checked against storage since they
/// are overwhelmingly improbable at this budget.
#[must_use]
pub fn generate_challenge() -> Challenge {
    generate_challenge_with(&mut rand::thread_rng())
}

fn generate_challenge_with<R>(rng: &mut R) -> Challenge
where
    R: RngCore + CryptoRng,
{
    let token: u128 = rng.gen();
    Challenge(format!("\"{CHALLENGE_KEY}={token:032x}\""))
}

#[cfg(test)]
mod test {
    use super::{generate_challenge, Challenge, CHALLENGE_KEY};

    #[test]
    fn token_format() {
        let challenge = generate_challenge();
        let value = challenge.as_str();

        assert!(value.starts_with(&format!("\"{CHALLENGE_KEY}=")));
        assert!(value.ends_with('"'));

        let hex_part = value
            .strip_prefix(&format!("\"{CHALLENGE_KEY}="))
            .unwrap()
            .strip_suffix('"')
            .unwrap();

        assert_eq!(hex_part.len(), 32);
        assert!(hex_part
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate_challenge();
        let b = generate_challenge();

        assert_ne!(a, b);
    }

    #[test]
    fn generated_token_round_trips_through_comparison() {
        let challenge = generate_challenge();

        // What the registrant publishes is exactly what we compare against
        let published = challenge.as_str().to_string();
        assert!(challenge.is_satisfied_by([published.as_str()].into_iter()));
    }

    #[test]
    fn comparison_is_exact() {
        let challenge = Challenge::from_stored(format!(
            "\"{CHALLENGE_KEY}=0123456789abcdef0123456789abcdef\""
        ));

        // Without the quotes it is a different record
        assert!(!challenge.is_satisfied_by(
            [format!("{CHALLENGE_KEY}=0123456789abcdef0123456789abcdef").as_str()].into_iter()
        ));
        assert!(!challenge.is_satisfied_by([""].into_iter()));
        assert!(challenge.is_satisfied_by(
            [
                "\"unrelated=record\"",
                "\"yivi_verifier_challenge=0123456789abcdef0123456789abcdef\"",
            ]
            .into_iter()
        ));
    }
}
