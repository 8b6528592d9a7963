//! Identifier generation
//!
//! IDs are a short type prefix plus the first 12 hex digits of a v4 UUID,
//! e.g. `DNR-3F2A9C01B7E4`.

/// Donor record prefix
pub const DONOR_PREFIX: &str = "DNR";
/// Appointment prefix
pub const APPOINTMENT_PREFIX: &str = "APT";
/// Donation visit prefix
pub const VISIT_PREFIX: &str = "VST";
/// Gift prefix
pub const GIFT_PREFIX: &str = "GFT";

/// Generate a new prefixed identifier
pub fn new_id(prefix: &str) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, raw[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_shape() {
        let id = new_id(DONOR_PREFIX);
        assert!(id.starts_with("DNR-"));
        assert_eq!(id.len(), 16);
        assert_ne!(id, new_id(DONOR_PREFIX));
    }
}
