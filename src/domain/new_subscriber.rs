use serde::Deserialize;

use crate::domain::subscriber_email::SubscriberEmail;
use crate::domain::subscriber_phone::SubscriberPhone;

pub struct NewSubscriber {
    pub email: SubscriberEmail,
    pub phone: Option<SubscriberPhone>,
}

/// Both fields are optional at the wire level so that a missing email is
/// answered with our own message rather than the extractor's.
#[derive(Deserialize, Debug)]
pub struct NewSubscriberBody {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum NewSubscriberError {
    MissingEmail,
    InvalidEmail(String),
    InvalidPhone(String),
}

impl TryFrom<NewSubscriberBody> for NewSubscriber {
    type Error = NewSubscriberError;

    fn try_from(body: NewSubscriberBody) -> Result<Self, Self::Error> {
        let email = match body.email {
            Some(email) if !email.trim().is_empty() => email.trim().to_string(),
            _ => return Err(NewSubscriberError::MissingEmail),
        };
        let email = SubscriberEmail::parse(email).map_err(NewSubscriberError::InvalidEmail)?;
        let phone =
            SubscriberPhone::parse_optional(body.phone).map_err(NewSubscriberError::InvalidPhone)?;

        Ok(NewSubscriber { email, phone })
    }
}
