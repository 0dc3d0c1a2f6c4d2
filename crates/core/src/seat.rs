use url::Url;

use crate::types::Product;

const AUDIT_MODE: &str = "audit";
const PROFESSIONAL_MODE: &str = "professional";
const NO_ID_PROFESSIONAL_MODE: &str = "no-id-professional";

/// Returns the enrollment mode a seat grants.
///
/// Seats without a certificate type are audit seats. Professional seats
/// that do not require identity verification map to `no-id-professional`.
pub fn mode_for_seat(product: &Product) -> String {
    let certificate_type = product
        .attributes
        .certificate_type
        .as_deref()
        .unwrap_or(AUDIT_MODE);

    if certificate_type.is_empty() {
        return AUDIT_MODE.to_string();
    }

    let id_verification_required = product
        .attributes
        .id_verification_required
        .unwrap_or(false);
    if certificate_type == PROFESSIONAL_MODE && !id_verification_required {
        return NO_ID_PROFESSIONAL_MODE.to_string();
    }

    certificate_type.to_string()
}

/// Builds the LMS course info page URL for a course.
pub fn course_info_url(lms_url_root: &str, course_id: &str) -> Result<Url, url::ParseError> {
    let root = Url::parse(lms_url_root)?;
    root.join(&format!("courses/{course_id}/info"))
}
