/// `Verified` is terminal, the registry never flips `verified` back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberStatus {
    Pending,
    Verified,
}

impl SubscriberStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, SubscriberStatus::Verified)
    }
}

impl From<bool> for SubscriberStatus {
    fn from(verified: bool) -> Self {
        if verified {
            SubscriberStatus::Verified
        } else {
            SubscriberStatus::Pending
        }
    }
}
