use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

const TOKEN_LENGTH: usize = 32;

/// Opaque credential embedded in the verification link. Drawn from the OS
/// CSPRNG, uniqueness is left to the `subscribers_verification_token_key`
/// constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationToken(String);

impl VerificationToken {
    pub fn issue() -> VerificationToken {
        let token = std::iter::repeat_with(|| OsRng.sample(Alphanumeric))
            .map(char::from)
            .take(TOKEN_LENGTH)
            .collect();

        Self(token)
    }

    /// Issued tokens only use the alphanumeric alphabet, anything else is
    /// rejected without touching the database.
    pub fn could_have_been_issued(token: &str) -> bool {
        !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

impl From<String> for VerificationToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl AsRef<str> for VerificationToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
