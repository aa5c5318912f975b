pub mod new_subscriber;
pub mod subscriber;
pub mod subscriber_email;
pub mod subscriber_phone;
pub mod subscriber_status;
pub mod verification_token;
