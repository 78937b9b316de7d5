use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wraps contact data (emails, phone numbers) so that `Debug`/`Display` never print it.
/// Serialization is transparent: API responses still carry the real value.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_hides_value_in_logs() {
        let email = Masked::new("candidate@example.com".to_string());
        assert_eq!(format!("{:?}", email), "********");
        assert_eq!(format!("{}", email), "********");
        assert_eq!(email.expose(), "candidate@example.com");
    }

    #[test]
    fn test_masked_is_transparent_on_the_wire() {
        let phone = Masked::new("9876543210".to_string());
        assert_eq!(serde_json::to_string(&phone).unwrap(), "\"9876543210\"");

        let back: Masked<String> = serde_json::from_str("\"9876543210\"").unwrap();
        assert_eq!(back, phone);
    }
}
