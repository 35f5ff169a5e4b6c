// src/config/matrix.rs

//! Matrix expansion: one job instance per combination of axis values.

use std::collections::BTreeMap;

/// Cartesian product of all axes, in axis (key) order.
///
/// An empty matrix yields a single empty combination.
pub fn combinations(matrix: &BTreeMap<String, Vec<String>>) -> Vec<BTreeMap<String, String>> {
    let mut combos = vec![BTreeMap::new()];

    for (axis, values) in matrix {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut c = combo.clone();
                c.insert(axis.clone(), value.clone());
                next.push(c);
            }
        }
        combos = next;
    }

    combos
}

/// Instance id for a job template and one matrix combination.
pub fn instance_id(template: &str, combo: &BTreeMap<String, String>) -> String {
    if combo.is_empty() {
        return template.to_string();
    }
    let values: Vec<&str> = combo.values().map(String::as_str).collect();
    format!("{} ({})", template, values.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matrix_has_one_combination() {
        let combos = combinations(&BTreeMap::new());
        assert_eq!(combos.len(), 1);
        assert_eq!(instance_id("build", &combos[0]), "build");
    }

    #[test]
    fn product_of_two_axes() {
        let mut m = BTreeMap::new();
        m.insert("os".to_string(), vec!["linux".to_string(), "mac".to_string()]);
        m.insert("py".to_string(), vec!["3.9".to_string(), "3.12".to_string()]);

        let combos = combinations(&m);
        let ids: Vec<String> = combos.iter().map(|c| instance_id("test", c)).collect();
        assert_eq!(
            ids,
            vec![
                "test (linux, 3.9)",
                "test (linux, 3.12)",
                "test (mac, 3.9)",
                "test (mac, 3.12)"
            ]
        );
    }
}
