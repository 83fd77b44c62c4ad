//! Strict parsing of the searchable endpoints' query parameters.
//!
//! Every searchable endpoint accepts its own filter lists plus the common
//! `order_by`, `arrange`, `limit` and `offset` parameters. Parsing is
//! all-or-nothing: an unknown parameter, an unknown `order_by` column or a
//! negative `limit`/`offset` fails the whole request with 400.

use std::collections::HashMap;

use sea_orm::Order;

/// Parsed common search parameters.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub order_by: Option<String>,
    pub arrange: Order,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Extracts `order_by`, `arrange`, `limit` and `offset` from `params`,
/// validating `order_by` against the endpoint's allowed names.
pub fn parse_options(
    params: &mut HashMap<String, String>,
    allowed_order: &[&str],
) -> Result<SearchOptions, String> {
    let order_by = params.remove("order_by");
    if let Some(name) = &order_by {
        if !allowed_order.contains(&name.as_str()) {
            return Err(format!("invalid 'order_by' value '{name}'"));
        }
    }

    let arrange = match params.remove("arrange").as_deref() {
        None | Some("asc") => Order::Asc,
        Some("desc") => Order::Desc,
        Some(other) => return Err(format!("invalid 'arrange' value '{other}'")),
    };

    Ok(SearchOptions {
        order_by,
        arrange,
        limit: parse_non_negative(params.remove("limit"), "limit")?,
        offset: parse_non_negative(params.remove("offset"), "offset")?,
    })
}

/// Removes a comma-separated list parameter.
pub fn take_list(params: &mut HashMap<String, String>, key: &str) -> Vec<String> {
    params
        .remove(key)
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_default()
}

/// Removes a comma-separated list of integers, failing on non-numeric
/// members.
pub fn take_int_list(
    params: &mut HashMap<String, String>,
    key: &str,
) -> Result<Vec<i32>, String> {
    take_list(params, key)
        .into_iter()
        .map(|raw| {
            raw.parse::<i32>()
                .map_err(|_| format!("invalid '{key}' member '{raw}'"))
        })
        .collect()
}

/// Fails if any parameter was not consumed by the endpoint.
pub fn ensure_consumed(params: &HashMap<String, String>) -> Result<(), String> {
    if params.is_empty() {
        return Ok(());
    }
    let mut keys: Vec<&str> = params.keys().map(String::as_str).collect();
    keys.sort_unstable();
    Err(format!(
        "invalid query parameters: {}",
        keys.join(", ")
    ))
}

fn parse_non_negative(raw: Option<String>, name: &str) -> Result<Option<u64>, String> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: i64 = raw
        .parse()
        .map_err(|_| format!("invalid '{name}' value '{raw}'"))?;
    if value < 0 {
        return Err(format!("'{name}' must not be negative"));
    }
    Ok(Some(value as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_the_common_parameters() {
        let mut p = params(&[
            ("order_by", "start"),
            ("arrange", "desc"),
            ("limit", "10"),
            ("offset", "20"),
        ]);
        let options = parse_options(&mut p, &["id", "start"]).unwrap();
        assert_eq!(options.order_by.as_deref(), Some("start"));
        assert_eq!(options.arrange, Order::Desc);
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.offset, Some(20));
        assert!(p.is_empty());
    }

    #[test]
    fn unknown_order_by_is_rejected() {
        let mut p = params(&[("order_by", "rowid")]);
        assert!(parse_options(&mut p, &["id", "start"]).is_err());
    }

    #[test]
    fn negative_limit_is_rejected() {
        let mut p = params(&[("limit", "-1")]);
        assert!(parse_options(&mut p, &["id"]).is_err());
    }

    #[test]
    fn bad_arrange_is_rejected() {
        let mut p = params(&[("arrange", "upside-down")]);
        assert!(parse_options(&mut p, &["id"]).is_err());
    }

    #[test]
    fn int_lists_fail_on_non_numeric_members() {
        let mut p = params(&[("ids", "1,2,x")]);
        assert!(take_int_list(&mut p, "ids").is_err());

        let mut p = params(&[("ids", "1,2,3")]);
        assert_eq!(take_int_list(&mut p, "ids").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn leftover_parameters_are_an_error() {
        let p = params(&[("bogus", "1")]);
        let err = ensure_consumed(&p).unwrap_err();
        assert!(err.contains("bogus"));
        assert!(ensure_consumed(&HashMap::new()).is_ok());
    }
}
