use anyhow::{Result, anyhow};

pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(anyhow!("Email cannot be empty"));
    }

    if email.len() > 254 {
        return Err(anyhow!("Email too long (maximum 254 characters)"));
    }

    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(anyhow!("Email contains invalid characters"));
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| anyhow!("Email must contain '@'"))?;

    if local.is_empty() || domain.contains('@') {
        return Err(anyhow!("Email must have exactly one '@' and a local part"));
    }

    let labels_ok = domain.split('.').count() >= 2 && domain.split('.').all(|l| !l.is_empty());

    if !labels_ok {
        return Err(anyhow!("Email domain must contain a dot-separated host name"));
    }

    Ok(())
}

pub fn validate_length(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.trim().chars().count();

    if len < min {
        return Err(anyhow!("{} must be at least {} characters long", field, min));
    }

    if len > max {
        return Err(anyhow!("{} must not exceed {} characters", field, max));
    }

    Ok(())
}
