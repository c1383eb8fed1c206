//! Parser for `scanimage --all-options` listings.
//!
//! ```text
//! All options specific to device `pixma:04A91749_10C2B2':
//!   Scan mode:
//!     --resolution auto||75|150|300|600|1200dpi [75]
//!         Sets the resolution of the scanned image.
//!     --mode auto|Color|Gray|Lineart [Color]
//!   Geometry:
//!     -x 0..216.069mm [216.069]
//!     --brightness -100..100% (in steps of 1) [0]
//!     --preview[=(yes|no)] [no]
//!     --button-update
//!     --threshold 0..100% (in steps of 1) [inactive]
//! ```
//!
//! Inactive options and buttons (options without a value) are skipped.

use scan_session_core::models::device::{DeviceOption, OptionConstraint};

const STEPS_MARKER: &str = "(in steps of ";

/// Parse the option listing of one device.
pub fn parse_all_options(listing: &str) -> Vec<DeviceOption> {
    let mut options = Vec::new();
    let mut current: Option<DeviceOption> = None;

    for line in listing.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with('-') {
            options.extend(current.take());
            current = parse_option_line(trimmed);
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        match current.as_mut() {
            // Descriptions sit deeper than option lines; anything shallower
            // is a group header such as "Scan mode:".
            Some(option) if indent > 4 => {
                if !option.description.is_empty() {
                    option.description.push(' ');
                }
                option.description.push_str(trimmed);
            }
            _ => options.extend(current.take()),
        }
    }
    options.extend(current);
    options
}

/// Device id named in the listing header, if present.
pub fn listed_device(listing: &str) -> Option<&str> {
    let header = listing.lines().find(|line| line.starts_with("All options"))?;
    let start = header.find(['`', '\''])? + 1;
    let end = start + header[start..].find('\'')?;
    Some(&header[start..end])
}

fn parse_option_line(line: &str) -> Option<DeviceOption> {
    let (flag, rest) = match line.split_once(char::is_whitespace) {
        Some((flag, rest)) => (flag, rest.trim()),
        None => (line, ""),
    };

    let (name, constraint) = if let Some((name, _)) = flag.split_once("[=(") {
        (name, Some(OptionConstraint::Boolean))
    } else {
        (flag, None)
    };
    let name = name.trim_start_matches('-');

    let (values, default) = split_default(rest)?;
    if default == "inactive" {
        return None;
    }

    let (constraint, unit) = match constraint {
        Some(boolean) => (boolean, None),
        None => parse_constraint(values)?,
    };

    Some(DeviceOption {
        name: name.to_string(),
        title: title_from_name(name),
        description: String::new(),
        unit,
        constraint,
        default: Some(default.to_string()),
    })
}

/// Split `values [default]` into its two halves.
fn split_default(rest: &str) -> Option<(&str, &str)> {
    let rest = rest.strip_suffix(']')?;
    let open = rest.rfind('[')?;
    Some((rest[..open].trim(), rest[open + 1..].trim()))
}

fn parse_constraint(values: &str) -> Option<(OptionConstraint, Option<String>)> {
    let (values, step) = match values.find(STEPS_MARKER) {
        Some(at) => {
            let step = values[at + STEPS_MARKER.len()..]
                .trim_end_matches(')')
                .trim()
                .parse::<f64>()
                .ok()
                .map(|step| step.round().max(1.0) as i64);
            (values[..at].trim(), step)
        }
        None => (values, None),
    };

    let values: Vec<&str> = values
        .split('|')
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "auto")
        .collect();

    match values.as_slice() {
        [] => None,
        [range] if range.contains("..") => parse_range(range, step.unwrap_or(1)),
        choices => {
            let mut choices: Vec<String> = choices.iter().map(|c| c.to_string()).collect();
            let unit = strip_unit(&mut choices);
            Some((OptionConstraint::Choices(choices), unit))
        }
    }
}

fn parse_range(range: &str, step: i64) -> Option<(OptionConstraint, Option<String>)> {
    let (min, max) = range.split_once("..")?;
    let (max, unit) = split_number(max);
    let min: f64 = min.trim().parse().ok()?;
    let max: f64 = max.parse().ok()?;

    Some((
        OptionConstraint::Range {
            min: min.ceil() as i64,
            max: max.floor() as i64,
            step,
        },
        unit,
    ))
}

/// Numeric choice lists carry their unit on the last entry (`...|1200dpi`).
fn strip_unit(choices: &mut [String]) -> Option<String> {
    let (last, others) = choices.split_last_mut()?;
    if others.iter().any(|choice| choice.parse::<f64>().is_err()) {
        return None;
    }
    let (number, unit) = split_number(last);
    let unit = unit?;
    *last = number.to_string();
    Some(unit)
}

fn split_number(text: &str) -> (&str, Option<String>) {
    let text = text.trim();
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(text.len());
    if end == 0 || end == text.len() {
        return (text, None);
    }
    (&text[..end], Some(text[end..].to_string()))
}

fn title_from_name(name: &str) -> String {
    let spaced = name.replace('-', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
