// Checks on the raw text of a booking request, before anything reaches the
// schedule or the upstream service.

use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::schedule_parser::parse_clock_time;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email regex is valid")
});

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-ZáéíóúÁÉÍÓÚñÑüÜ\s'-]+$").expect("name regex is valid"));

const MAX_EMAIL_LEN: usize = 254;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("La fecha es obligatoria en formato YYYY-MM-DD. Ejemplo: 2026-03-15")]
    MissingDate,

    #[error("La fecha '{0}' no tiene formato válido. Usa YYYY-MM-DD. Ejemplo: 2026-03-15")]
    BadDate(String),

    #[error("La fecha no puede ser en el pasado")]
    PastDate,

    #[error("Formato de hora inválido. Debe ser HH:MM AM/PM (ejemplo: 02:30 PM) o HH:MM (ejemplo: 14:30)")]
    BadTime,

    #[error("El nombre debe tener al menos 2 caracteres")]
    NameTooShort,

    #[error("El nombre no debe contener números")]
    NameHasDigits,

    #[error("El nombre contiene caracteres no válidos")]
    NameInvalidChars,

    #[error("El email no puede estar vacío.")]
    EmptyEmail,

    #[error("El email es demasiado largo.")]
    EmailTooLong,

    #[error("El contacto debe ser un email válido (ejemplo: nombre@dominio.com). Recibido: {0}")]
    BadEmail(String),
}

/// Format-only date check (does not look at the calendar).
pub fn parse_date(date: &str) -> Result<NaiveDate, InputError> {
    let trimmed = date.trim();
    if trimmed.is_empty() {
        return Err(InputError::MissingDate);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| InputError::BadDate(trimmed.to_string()))
}

pub fn parse_future_date(date: &str, today: NaiveDate) -> Result<NaiveDate, InputError> {
    let parsed = parse_date(date)?;
    if parsed < today {
        return Err(InputError::PastDate);
    }
    Ok(parsed)
}

pub fn parse_time(time: &str) -> Result<NaiveTime, InputError> {
    parse_clock_time(time).ok_or(InputError::BadTime)
}

// Returns the name title-cased, e.g. "maría del carmen" -> "María Del Carmen".
pub fn validate_customer_name(name: &str) -> Result<String, InputError> {
    let trimmed = name.trim();
    if trimmed.chars().count() < 2 {
        return Err(InputError::NameTooShort);
    }
    if trimmed.chars().any(|c| c.is_ascii_digit()) {
        return Err(InputError::NameHasDigits);
    }
    if !NAME_RE.is_match(trimmed) {
        return Err(InputError::NameInvalidChars);
    }
    Ok(title_case(trimmed))
}

// Returns the address lowercased.
pub fn validate_email(email: &str) -> Result<String, InputError> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(InputError::EmptyEmail);
    }
    if trimmed.len() > MAX_EMAIL_LEN {
        return Err(InputError::EmailTooLong);
    }
    if !EMAIL_RE.is_match(trimmed) {
        return Err(InputError::BadEmail(trimmed.to_string()));
    }
    Ok(trimmed.to_lowercase())
}

fn title_case(text: &str) -> String {
    let mut previous_is_letter = false;
    text.chars()
        .flat_map(|c| {
            let mapped: Vec<char> = if previous_is_letter {
                c.to_lowercase().collect()
            } else {
                c.to_uppercase().collect()
            };
            previous_is_letter = c.is_alphabetic();
            mapped
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_checks() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 26).unwrap();

        assert_eq!(parse_date(" 2026-01-27 ").unwrap().to_string(), "2026-01-27");
        assert_eq!(parse_date(""), Err(InputError::MissingDate));
        assert_eq!(
            parse_date("27/01/2026"),
            Err(InputError::BadDate("27/01/2026".to_string()))
        );
        assert_eq!(parse_date("2026-02-30"), Err(InputError::BadDate("2026-02-30".to_string())));

        assert!(parse_future_date("2026-01-26", today).is_ok());
        assert_eq!(parse_future_date("2026-01-25", today), Err(InputError::PastDate));
    }

    #[test]
    fn test_time_checks() {
        assert!(parse_time("02:30 PM").is_ok());
        assert!(parse_time("14:30").is_ok());
        assert_eq!(parse_time("2 y media"), Err(InputError::BadTime));
    }

    #[test]
    fn test_customer_name() {
        assert_eq!(validate_customer_name("  juan pérez ").unwrap(), "Juan Pérez");
        assert_eq!(validate_customer_name("o'neil-smith").unwrap(), "O'Neil-Smith");
        assert_eq!(validate_customer_name("J"), Err(InputError::NameTooShort));
        assert_eq!(validate_customer_name("R2D2"), Err(InputError::NameHasDigits));
        assert_eq!(validate_customer_name("Ana <script>"), Err(InputError::NameInvalidChars));
    }

    #[test]
    fn test_email() {
        assert_eq!(validate_email(" Ana.Perez@Example.COM ").unwrap(), "ana.perez@example.com");
        assert_eq!(validate_email("  "), Err(InputError::EmptyEmail));
        assert!(matches!(validate_email("ana@example"), Err(InputError::BadEmail(_))));
        assert!(matches!(validate_email("+51 999 888 777"), Err(InputError::BadEmail(_))));

        let long = format!("{}@example.com", "a".repeat(250));
        assert_eq!(validate_email(&long), Err(InputError::EmailTooLong));
    }
}
