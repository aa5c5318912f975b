const MAX_LENGTH: usize = 64;

/// Free-form contact phone attached to a subscription. The number is never
/// dialled by this service, so only its length is bounded.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberPhone(String);

impl SubscriberPhone {
    /// Blank input means the subscriber left the field empty.
    pub fn parse_optional(phone: Option<String>) -> Result<Option<SubscriberPhone>, String> {
        match phone {
            Some(phone) if !phone.trim().is_empty() => Self::parse(phone).map(Some),
            _ => Ok(None),
        }
    }

    pub fn parse(phone: String) -> Result<SubscriberPhone, String> {
        let phone = phone.trim().to_string();

        if phone.chars().count() > MAX_LENGTH {
            return Err(format!(
                "phone number is longer than {} characters",
                MAX_LENGTH
            ));
        }

        Ok(Self(phone))
    }
}

impl AsRef<str> for SubscriberPhone {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
