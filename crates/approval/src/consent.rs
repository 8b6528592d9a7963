//! Consent document rendering and hashing

use milkbank_core::DonorRecord;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Consent text shown to the donor before signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentDocument {
    pub donor_id: String,
    pub text: String,
    pub document_hash: String,
}

const BODY: &str = "\
I consent to donate breast milk to the milk bank. I confirm that the health
information I gave during screening is true, that I have been told the
results of my screening tests, and that I will tell the milk bank staff
about any illness, medication or change in my health before each donation.
I understand that donated milk is pasteurised and given to infants in need
and that I may withdraw from the programme at any time.";

/// Render the consent text for a donor. Deterministic for the same record
/// details, so the hash is stable between preview and signing.
pub fn render(donor: &DonorRecord) -> ConsentDocument {
    let mut text = String::new();
    text.push_str("MILK DONOR CONSENT\n\n");
    text.push_str(&format!("Donor: {}\n", donor.full_name));
    text.push_str(&format!("Donor ID: {}\n", donor.id));
    if let Some(dob) = donor.date_of_birth {
        text.push_str(&format!("Date of birth: {}\n", dob.format("%Y-%m-%d")));
    }
    for test in &donor.test_references {
        text.push_str(&format!("Screening test {}: {}\n", test.reference, test.result));
    }
    text.push('\n');
    text.push_str(BODY);
    text.push('\n');

    ConsentDocument {
        donor_id: donor.id.clone(),
        document_hash: hash(&text),
        text,
    }
}

/// SHA-256 of `text`, hex encoded
pub fn hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
