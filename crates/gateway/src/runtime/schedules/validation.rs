//! Input validation for schedule fields (cron expressions, IANA
//! timezones).

use shannon_domain::error::Error;

/// Validate a 5-field cron expression by checking field count and that
/// each field parses as `*`, `*/N`, `N`, `N-M`, or a comma list thereof.
pub fn validate_cron(cron: &str) -> Result<(), Error> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::InvalidRequest(format!(
            "cron expression must have 5 fields (minute hour dom month dow), got {}",
            fields.len()
        )));
    }
    for field in &fields {
        if !field_is_valid(field) {
            return Err(Error::InvalidRequest(format!("invalid cron field: {field}")));
        }
    }
    Ok(())
}

fn field_is_valid(field: &str) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        return step.parse::<u32>().map(|n| n > 0).unwrap_or(false);
    }
    field.split(',').all(|part| {
        if let Some((start, end)) = part.split_once('-') {
            start.parse::<u32>().is_ok() && end.parse::<u32>().is_ok()
        } else {
            part.parse::<u32>().is_ok()
        }
    })
}

/// Validate an IANA timezone name.
pub fn validate_timezone(tz: &str) -> Result<(), Error> {
    tz.parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| Error::InvalidRequest(format!("unknown timezone: {tz}")))
}
