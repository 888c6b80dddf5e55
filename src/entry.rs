use std::collections::{HashMap, HashSet};

use ldap3::SearchEntry;
use serde::Serialize;

/// One normalized attribute value.
///
/// A single server value collapses to the scalar form; two or more stay a
/// sequence in server return order. Whether a value is text or bytes is
/// decided by the caller's binary-attribute list, never by sniffing the
/// content.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    Binary(Vec<u8>),
    TextVec(Vec<String>),
    BinaryVec(Vec<Vec<u8>>),
}

/// One matched directory object.
///
/// `attrs` holds an entry for every requested attribute name, keyed
/// exactly as the caller wrote it. `None` means the server did not return
/// that attribute for this object; absence is preserved, never coerced to
/// an empty string or sequence.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Option<AttrValue>>,
}

impl DirectoryEntry {
    /// Value of a requested attribute, `None` for unrequested names or
    /// attributes the server did not return.
    pub fn value(&self, attr: &str) -> Option<&AttrValue> {
        self.attrs.get(attr).and_then(|v| v.as_ref())
    }
}

/// Normalize one raw search entry against the caller's attribute lists.
///
/// Attribute names are matched case-insensitively: LDAP attribute names
/// are case-insensitive and servers echo them in their own casing. The
/// protocol library splits returned values into a UTF-8 map and a raw
/// map; both are consulted so that a binary-flagged attribute always
/// comes back as bytes (re-encoding decodable values) and any other
/// attribute always comes back as text (lossily decoding raw values).
pub(crate) fn normalize(
    entry: SearchEntry,
    wanted: &[String],
    binary: &HashSet<String>,
) -> DirectoryEntry {
    let mut text: HashMap<String, Vec<String>> = entry
        .attrs
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();
    let mut raw: HashMap<String, Vec<Vec<u8>>> = entry
        .bin_attrs
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();

    let mut attrs = HashMap::with_capacity(wanted.len());
    for name in wanted {
        let key = name.to_ascii_lowercase();
        let value = if binary.contains(&key) {
            let mut vals = raw.remove(&key).unwrap_or_default();
            vals.extend(
                text.remove(&key)
                    .unwrap_or_default()
                    .into_iter()
                    .map(String::into_bytes),
            );
            collapse(vals, AttrValue::Binary, AttrValue::BinaryVec)
        } else {
            let mut vals = text.remove(&key).unwrap_or_default();
            vals.extend(
                raw.remove(&key)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|v| String::from_utf8_lossy(&v).into_owned()),
            );
            collapse(vals, AttrValue::Text, AttrValue::TextVec)
        };
        attrs.insert(name.clone(), value);
    }

    DirectoryEntry {
        dn: entry.dn,
        attrs,
    }
}

fn collapse<T>(
    mut vals: Vec<T>,
    one: impl FnOnce(T) -> AttrValue,
    many: impl FnOnce(Vec<T>) -> AttrValue,
) -> Option<AttrValue> {
    match vals.len() {
        0 => None,
        1 => vals.pop().map(one),
        _ => Some(many(vals)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_entry() -> SearchEntry {
        SearchEntry {
            dn: "cn=alice,dc=example,dc=com".to_string(),
            attrs: HashMap::new(),
            bin_attrs: HashMap::new(),
        }
    }

    fn wanted(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn absent_attribute_is_null() {
        let out = normalize(raw_entry(), &wanted(&["mail"]), &HashSet::new());
        assert_eq!(out.attrs["mail"], None);
        assert_eq!(out.value("mail"), None);
    }

    #[test]
    fn single_value_collapses_to_scalar() {
        let mut entry = raw_entry();
        entry
            .attrs
            .insert("mail".to_string(), vec!["alice@example.com".to_string()]);
        let out = normalize(entry, &wanted(&["mail"]), &HashSet::new());
        assert_eq!(
            out.value("mail"),
            Some(&AttrValue::Text("alice@example.com".to_string()))
        );
    }

    #[test]
    fn multiple_values_stay_a_sequence_in_server_order() {
        let mut entry = raw_entry();
        entry.attrs.insert(
            "memberOf".to_string(),
            vec!["cn=b".to_string(), "cn=a".to_string()],
        );
        let out = normalize(entry, &wanted(&["memberOf"]), &HashSet::new());
        assert_eq!(
            out.value("memberOf"),
            Some(&AttrValue::TextVec(vec![
                "cn=b".to_string(),
                "cn=a".to_string()
            ]))
        );
    }

    #[test]
    fn binary_flag_wins_over_decodable_content() {
        let mut entry = raw_entry();
        entry
            .attrs
            .insert("objectguid".to_string(), vec!["abcd".to_string()]);
        let binary: HashSet<String> = ["objectguid".to_string()].into();
        let out = normalize(entry, &wanted(&["objectGUID"]), &binary);
        assert_eq!(
            out.value("objectGUID"),
            Some(&AttrValue::Binary(b"abcd".to_vec()))
        );
    }

    #[test]
    fn binary_values_come_from_the_raw_map() {
        let mut entry = raw_entry();
        entry
            .bin_attrs
            .insert("objectguid".to_string(), vec![vec![0xde, 0xad, 0xbe]]);
        let binary: HashSet<String> = ["objectguid".to_string()].into();
        let out = normalize(entry, &wanted(&["objectGUID"]), &binary);
        assert_eq!(
            out.value("objectGUID"),
            Some(&AttrValue::Binary(vec![0xde, 0xad, 0xbe]))
        );
    }

    #[test]
    fn text_attribute_decodes_raw_values_lossily() {
        let mut entry = raw_entry();
        entry
            .bin_attrs
            .insert("description".to_string(), vec![vec![0xff, b'h', b'i']]);
        let out = normalize(entry, &wanted(&["description"]), &HashSet::new());
        match out.value("description") {
            Some(AttrValue::Text(s)) => assert!(s.ends_with("hi")),
            other => panic!("expected lossy text, got {other:?}"),
        }
    }

    #[test]
    fn lookup_is_case_insensitive_and_output_keeps_caller_casing() {
        let mut entry = raw_entry();
        entry
            .attrs
            .insert("Mail".to_string(), vec!["a@b".to_string()]);
        let out = normalize(entry, &wanted(&["mail"]), &HashSet::new());
        assert_eq!(out.value("mail"), Some(&AttrValue::Text("a@b".to_string())));
    }

    #[test]
    fn dn_is_carried_through() {
        let out = normalize(raw_entry(), &[], &HashSet::new());
        assert_eq!(out.dn, "cn=alice,dc=example,dc=com");
        assert!(!out.dn.is_empty());
    }

    #[test]
    fn null_serializes_as_json_null_and_scalar_as_string() {
        let mut entry = raw_entry();
        entry
            .attrs
            .insert("mail".to_string(), vec!["a@b".to_string()]);
        let out = normalize(entry, &wanted(&["mail", "title"]), &HashSet::new());
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["attrs"]["mail"], serde_json::json!("a@b"));
        assert_eq!(json["attrs"]["title"], serde_json::Value::Null);
    }
}
