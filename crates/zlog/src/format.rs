//! Plain string helpers for request logging

use std::fmt::Display;

/// First argument followed by a space, or an empty string without one
pub fn print(args: &[&dyn Display]) -> String {
    match args.first() {
        Some(arg) => format!("{} ", arg),
        None => String::new(),
    }
}

/// One-line HTTP request summary from method, status, request, ip and
/// duration in seconds
///
/// Returns an empty string when fewer than five arguments are given; extra
/// arguments are ignored. A duration that reads as a number is printed with
/// six decimals.
pub fn printf(args: &[&dyn Display]) -> String {
    if args.len() < 5 {
        return String::new();
    }

    format!(
        "method: {}, statusCode: {}, req: {}, ip: {}, time: {}s",
        args[0],
        args[1],
        args[2],
        args[3],
        seconds(args[4])
    )
}

fn seconds(value: &dyn Display) -> String {
    let text = value.to_string();
    match text.trim().parse::<f64>() {
        Ok(secs) => format!("{:.6}", secs),
        Err(_) => text,
    }
}
