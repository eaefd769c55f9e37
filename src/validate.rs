//! Explicit per-DTO validation. Each check appends a `{field, message}`
//! entry; callers decide how to surface the list.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Fully merged student record as it is about to be persisted.
#[derive(Debug, Clone, Default)]
pub struct StudentInput {
    pub mssv: String,
    pub name: String,
    pub dob: String,
    pub gender: String,
    pub faculty: String,
    pub course: String,
    pub program: String,
    pub address: String,
    pub email: String,
    pub phone: String,
    pub status: String,
}

const GENDERS: [&str; 3] = ["Nam", "Nữ", "Khác"];

/// Validate a student record. `allowed_domain` carries the resolved
/// email-domain rule: `Some(domain)` when the rule is active, `None` when
/// it is not. The caller resolves the flag once per operation.
pub fn validate_student(input: &StudentInput, allowed_domain: Option<&str>) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if input.mssv.chars().count() != 8 {
        errors.push(FieldError::new("mssv", "mssv must be exactly 8 characters"));
    }
    for (field, value) in [
        ("name", &input.name),
        ("dob", &input.dob),
        ("faculty", &input.faculty),
        ("course", &input.course),
        ("program", &input.program),
        ("address", &input.address),
        ("status", &input.status),
    ] {
        if value.trim().is_empty() {
            errors.push(FieldError::new(field, format!("{} is required", field)));
        }
    }

    if !GENDERS.contains(&input.gender.as_str()) {
        errors.push(FieldError::new(
            "gender",
            "gender must be one of Nam, Nữ, Khác",
        ));
    }

    match email_domain(&input.email) {
        None => errors.push(FieldError::new("email", "email must be a valid address")),
        Some(domain) => {
            if let Some(allowed) = allowed_domain {
                if domain != allowed {
                    errors.push(FieldError::new(
                        "email",
                        format!("email must belong to the {} domain", allowed),
                    ));
                }
            }
        }
    }

    if !valid_phone(&input.phone) {
        errors.push(FieldError::new(
            "phone",
            "phone must be +84 or 0 followed by 3, 5, 7, 8 or 9 and 8 digits",
        ));
    }

    errors
}

fn email_domain(email: &str) -> Option<&str> {
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || domain.contains(' ') {
        return None;
    }
    Some(domain)
}

fn valid_phone(phone: &str) -> bool {
    let rest = if let Some(r) = phone.strip_prefix("+84") {
        r
    } else if let Some(r) = phone.strip_prefix('0') {
        r
    } else {
        return false;
    };
    rest.len() == 9
        && matches!(rest.as_bytes()[0], b'3' | b'5' | b'7' | b'8' | b'9')
        && rest.bytes().all(|b| b.is_ascii_digit())
}
