//! Parsing of `Name[option=value,...]` config values.

use std::collections::HashMap;

/// Splits config value into the name and the options string (if present).
///
/// `Random[fanout=2]` gives `("Random", Some("fanout=2"))`, `Ring` gives `("Ring", None)`.
pub fn parse_config_value(config_str: &str) -> (String, Option<String>) {
    match config_str.split_once('[') {
        Some((l, r)) => (l.trim().to_string(), Some(r.replace(']', ""))),
        None => (config_str.trim().to_string(), None),
    }
}

/// Parses options string from config value, returns map with option names and values.
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for option_str in options_str.split(',') {
        if let Some((name, value)) = option_str.split_once('=') {
            options.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_with_options() {
        let (name, options) = parse_config_value("Random[fanout=2, seed=4]");
        assert_eq!(name, "Random");
        let options = parse_options(&options.unwrap());
        assert_eq!(options.get("fanout").unwrap(), "2");
        assert_eq!(options.get("seed").unwrap(), "4");
        assert_eq!(options.get("other"), None);
    }

    #[test]
    fn value_without_options() {
        assert_eq!(parse_config_value("Ring"), ("Ring".to_string(), None));
    }
}
