//! Manual code entry.
//!
//! The code printed on a vehicle is a prefix and three characters, e.g.
//! `B-16A`. The operator types it into four boxes; the dash is implied.
use super::FormError;

/// Build the lookup code from the four input boxes.
///
/// Each box is stripped to ASCII alphanumerics and must keep at least one
/// character, so a composed code is never shorter than five characters.
/// The result is uppercased.
pub fn compose_code(boxes: [&str; 4]) -> Result<String, FormError> {
    let cleaned: Vec<String> = boxes.iter().map(|b| sanitize(b)).collect();
    if cleaned.iter().any(String::is_empty) {
        return Err(FormError::IncompleteCode);
    }

    let code = format!("{}-{}{}{}", cleaned[0], cleaned[1], cleaned[2], cleaned[3]);
    Ok(code.to_ascii_uppercase())
}

fn sanitize(input: &str) -> String {
    input.chars().filter(char::is_ascii_alphanumeric).collect()
}
