//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Helpers for converting between string paths of the form
//! `a/b[key=value]/c` and the structured gNMI path representation.

use std::collections::HashMap;
use std::time::SystemTime;

use itertools::join;

use crate::proto::gnmi;

/// Parses a string path into a gNMI path.
///
/// Each element may carry any number of `[key=value]` qualifiers, e.g.
/// `interfaces/interface[name=eth0]/state/oper-status`.
pub fn to_path(path: &str) -> gnmi::Path {
    let elem = path
        .split('/')
        .filter(|elem| !elem.is_empty())
        .map(parse_elem)
        .collect();

    gnmi::Path {
        origin: String::new(),
        elem,
        target: String::new(),
    }
}

fn parse_elem(elem: &str) -> gnmi::PathElem {
    let mut key = HashMap::new();

    let (name, rest) = match elem.find('[') {
        Some(pos) => (&elem[..pos], &elem[pos..]),
        None => (elem, ""),
    };
    for qualifier in rest.split('[').filter(|s| !s.is_empty()) {
        let qualifier = qualifier.trim_end_matches(']');
        if let Some((k, v)) = qualifier.split_once('=') {
            key.insert(k.to_owned(), v.to_owned());
        }
    }

    gnmi::PathElem {
        name: name.to_owned(),
        key,
    }
}

/// Joins an optional prefix and a path into a single string path.
pub fn join_paths(prefix: Option<&gnmi::Path>, path: &gnmi::Path) -> String {
    match prefix {
        Some(prefix) if !prefix.elem.is_empty() => {
            format!("{}/{}", prefix, path)
        }
        _ => path.to_string(),
    }
}

/// Returns the name of the last element of the given path, if any.
pub fn last_elem_name(path: &gnmi::Path) -> Option<&str> {
    path.elem.last().map(|elem| elem.name.as_str())
}

/// Returns the value of the named key of the path element at `index`.
pub fn elem_key<'a>(
    path: &'a gnmi::Path,
    index: usize,
    key: &str,
) -> Option<&'a str> {
    path.elem
        .get(index)
        .and_then(|elem| elem.key.get(key))
        .map(|value| value.as_str())
}

/// Returns the signed integer carried by a typed value, if any.
pub fn int_value(val: &gnmi::TypedValue) -> Option<i64> {
    match val.value {
        Some(gnmi::typed_value::Value::IntVal(v)) => Some(v),
        Some(gnmi::typed_value::Value::UintVal(v)) => Some(v as i64),
        _ => None,
    }
}

/// Returns the unsigned integer carried by a typed value, if any.
pub fn uint_value(val: &gnmi::TypedValue) -> Option<u64> {
    match val.value {
        Some(gnmi::typed_value::Value::UintVal(v)) => Some(v),
        Some(gnmi::typed_value::Value::IntVal(v)) if v >= 0 => Some(v as u64),
        _ => None,
    }
}

/// Returns the string carried by a typed value, if any.
pub fn string_value(val: &gnmi::TypedValue) -> Option<&str> {
    match &val.value {
        Some(gnmi::typed_value::Value::StringVal(v)) => Some(v.as_str()),
        _ => None,
    }
}

/// Returns the current time as nanoseconds since the unix epoch, in the
/// representation used by gNMI notifications.
pub fn get_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System time before UNIX EPOCH!")
        .as_nanos() as i64
}

// ===== Display methods =====

impl std::fmt::Display for gnmi::Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = join(
            self.elem.iter().map(|pelm| {
                if pelm.key.is_empty() {
                    pelm.name.to_owned()
                } else {
                    let mut keys = pelm.key.iter().collect::<Vec<_>>();
                    keys.sort();
                    let keys = join(
                        keys.into_iter()
                            .map(|(key, value)| format!("[{key}={value}]")),
                        "",
                    );
                    format!("{}{}", pelm.name, keys)
                }
            }),
            "/",
        );

        write!(f, "{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_path() {
        let path = to_path("state/link[port=3]/egress-port");
        assert_eq!(path.elem.len(), 3);
        assert_eq!(path.elem[0].name, "state");
        assert_eq!(path.elem[1].name, "link");
        assert_eq!(path.elem[1].key.get("port"), Some(&"3".to_owned()));
        assert_eq!(path.elem[2].name, "egress-port");
    }

    #[test]
    fn test_path_round_trip() {
        for path in [
            "config/emitFrequency",
            "state/link[port=3]/egress-device",
            "interfaces/interface[name=eth0]/state/oper-status",
        ] {
            assert_eq!(to_path(path).to_string(), path);
        }
    }

    #[test]
    fn test_elem_key() {
        let path = to_path("interfaces/interface[name=eth0]/state");
        assert_eq!(elem_key(&path, 1, "name"), Some("eth0"));
        assert_eq!(elem_key(&path, 0, "name"), None);
    }
}
