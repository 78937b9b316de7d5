use mockprep_core::models::ContactDetails;
use mockprep_core::{CoreError, CoreResult};
use mockprep_shared::Masked;
use serde::Deserialize;

const MAX_NAME_LEN: usize = 100;
const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;

/// Raw details as submitted by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct DetailsInput {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub exam_applied: Option<String>,
    #[serde(default)]
    pub prior_attempts: Option<i64>,
}

/// Checks every field and reports all failures together.
pub fn validate_details(input: DetailsInput) -> CoreResult<ContactDetails> {
    let mut problems = Vec::new();

    let name = input.name.trim();
    if name.is_empty() {
        problems.push("name is required".to_string());
    } else if name.chars().count() > MAX_NAME_LEN {
        problems.push(format!("name must be at most {} characters", MAX_NAME_LEN));
    }

    let email = input.email.trim();
    if !is_valid_email(email) {
        problems.push("email is not a valid address".to_string());
    }

    let phone = normalize_phone(&input.phone);
    if phone.is_none() {
        problems.push(format!("phone must contain at least {} digits", MIN_PHONE_DIGITS));
    }

    let prior_attempts = match input.prior_attempts {
        Some(n) if n < 0 => {
            problems.push("prior attempts must not be negative".to_string());
            None
        }
        Some(n) => match u32::try_from(n) {
            Ok(n) => Some(n),
            Err(_) => {
                problems.push("prior attempts is out of range".to_string());
                None
            }
        },
        None => None,
    };

    if !problems.is_empty() {
        return Err(CoreError::ValidationError(problems.join("; ")));
    }

    let exam_applied = input
        .exam_applied
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    Ok(ContactDetails {
        name: name.to_string(),
        email: Masked::new(email.to_lowercase()),
        phone: Masked::new(phone.unwrap_or_default()),
        exam_applied,
        prior_attempts,
    })
}

/// `local@domain.tld` with no whitespace and a dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && !tld.is_empty() && !domain.starts_with('.') && !domain.contains("..")
}

/// Strips common separators. Keeps a leading `+`. Returns None for anything else.
fn normalize_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (plus, rest) = match raw.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", raw),
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }

    if digits.len() < MIN_PHONE_DIGITS || digits.len() > MAX_PHONE_DIGITS {
        return None;
    }
    Some(format!("{}{}", plus, digits))
}
