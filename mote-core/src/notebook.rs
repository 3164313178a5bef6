//! Notebook stores: per-device entries, group-shared entries, and aggregation over members.
//!
//! Conflicting writes resolve to whichever update was applied locally last
//! (last-delivered-wins); there is no logical clock.

use std::collections::HashMap;
use std::str::FromStr;

use crate::protocol::Value;

/// Per-device key/value store. Self's entries live here under self's name.
#[derive(Debug, Default)]
pub struct Notebook {
    devices: HashMap<String, HashMap<String, Value>>,
}

impl Notebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `device`'s `key`. Returns the previous value.
    pub fn set(&mut self, device: &str, key: &str, value: Value) -> Option<Value> {
        self.devices
            .entry(device.to_owned())
            .or_default()
            .insert(key.to_owned(), value)
    }

    pub fn delete(&mut self, device: &str, key: &str) -> Option<Value> {
        let entries = self.devices.get_mut(device)?;
        let old = entries.remove(key);
        if entries.is_empty() {
            self.devices.remove(device);
        }
        old
    }

    pub fn get(&self, device: &str, key: &str) -> Option<&Value> {
        self.devices.get(device)?.get(key)
    }

    /// Drop every entry of `device`. Returns how many keys it held.
    pub fn forget_device(&mut self, device: &str) -> usize {
        self.devices.remove(device).map(|e| e.len()).unwrap_or(0)
    }

    /// Rename a device's entries (used when self is renamed).
    pub fn rename_device(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if let Some(entries) = self.devices.remove(from) {
            self.devices.insert(to.to_owned(), entries);
        }
    }

    pub fn keys(&self, device: &str) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .devices
            .get(device)
            .map(|e| e.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Values held for `key` by `members`, in member order. Absent entries are skipped.
    pub fn values_for<'s, 'm>(&'s self, key: &str, members: &[&'m str]) -> Vec<(&'m str, &'s Value)> {
        members
            .iter()
            .filter_map(|&m| self.get(m, key).map(|v| (m, v)))
            .collect()
    }

    /// Numeric values held for `key` by `members`. Text and absent entries are skipped, not coerced.
    pub fn numbers_for<'m>(&self, key: &str, members: &[&'m str]) -> Vec<(&'m str, f64)> {
        self.values_for(key, members)
            .into_iter()
            .filter_map(|(m, v)| v.as_number().map(|n| (m, n)))
            .collect()
    }
}

/// Shared store partitioned by group. `None` is the ungrouped namespace.
#[derive(Debug, Default)]
pub struct SharedNotebook {
    groups: HashMap<Option<String>, HashMap<String, Value>>,
}

impl SharedNotebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, group: Option<&str>, key: &str, value: Value) -> Option<Value> {
        self.groups
            .entry(group.map(str::to_owned))
            .or_default()
            .insert(key.to_owned(), value)
    }

    pub fn delete(&mut self, group: Option<&str>, key: &str) -> Option<Value> {
        let group = group.map(str::to_owned);
        let entries = self.groups.get_mut(&group)?;
        let old = entries.remove(key);
        if entries.is_empty() {
            self.groups.remove(&group);
        }
        old
    }

    pub fn get(&self, group: Option<&str>, key: &str) -> Option<&Value> {
        self.groups.get(&group.map(str::to_owned))?.get(key)
    }

    pub fn keys(&self, group: Option<&str>) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .groups
            .get(&group.map(str::to_owned))
            .map(|e| e.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }
}

/// Aggregation over members' numeric values for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Max,
    Min,
    Sum,
    Avg,
}

/// Which extremum to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Max,
    Min,
}

impl From<Extremum> for Aggregate {
    fn from(e: Extremum) -> Self {
        match e {
            Extremum::Max => Aggregate::Max,
            Extremum::Min => Aggregate::Min,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown operation {0:?}")]
pub struct UnknownOperation(pub String);

impl FromStr for Aggregate {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Aggregate::Max),
            "min" => Ok(Aggregate::Min),
            "sum" => Ok(Aggregate::Sum),
            "avg" | "mean" => Ok(Aggregate::Avg),
            _ => Err(UnknownOperation(s.to_owned())),
        }
    }
}

impl FromStr for Extremum {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Extremum::Max),
            "min" => Ok(Extremum::Min),
            _ => Err(UnknownOperation(s.to_owned())),
        }
    }
}

/// Aggregate `values`. With no values every operation yields 0.
pub fn aggregate(values: &[f64], op: Aggregate) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match op {
        Aggregate::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregate::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregate::Sum => values.iter().sum(),
        Aggregate::Avg => values.iter().sum::<f64>() / values.len() as f64,
    }
}

/// First contributor holding the extremum. Ties go to the earlier contributor.
pub fn device_with_extremum<'m>(contributions: &[(&'m str, f64)], which: Extremum) -> Option<&'m str> {
    if contributions.is_empty() {
        return None;
    }
    let values: Vec<f64> = contributions.iter().map(|&(_, v)| v).collect();
    let target = aggregate(&values, which.into());
    contributions
        .iter()
        .find(|&&(_, v)| v == target)
        .map(|&(m, _)| m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let mut nb = Notebook::new();
        assert_eq!(nb.set("a", "temp", Value::from(21)), None);
        assert_eq!(nb.set("a", "temp", Value::from(22)), Some(Value::from(21)));
        assert_eq!(nb.get("a", "temp"), Some(&Value::from(22)));
        assert_eq!(nb.delete("a", "temp"), Some(Value::from(22)));
        assert_eq!(nb.get("a", "temp"), None);
        assert_eq!(nb.delete("a", "temp"), None);
        assert_eq!(nb.devices().count(), 0);
    }

    #[test]
    fn forget_device_removes_all_keys() {
        let mut nb = Notebook::new();
        nb.set("a", "x", Value::from(1));
        nb.set("a", "y", Value::from("t"));
        nb.set("b", "x", Value::from(2));
        assert_eq!(nb.forget_device("a"), 2);
        assert_eq!(nb.forget_device("a"), 0);
        assert_eq!(nb.keys("a"), Vec::<&str>::new());
        assert_eq!(nb.keys("b"), vec!["x"]);
    }

    #[test]
    fn rename_moves_entries() {
        let mut nb = Notebook::new();
        nb.set("old", "k", Value::from(1));
        nb.rename_device("old", "new");
        assert_eq!(nb.get("new", "k"), Some(&Value::from(1)));
        assert_eq!(nb.get("old", "k"), None);
    }

    #[test]
    fn numbers_skip_text_and_absent() {
        let mut nb = Notebook::new();
        nb.set("a", "k", Value::from(3));
        nb.set("b", "k", Value::from("7"));
        nb.set("c", "k", Value::from(5));
        let members = ["a", "b", "c", "d"];
        assert_eq!(nb.numbers_for("k", &members), vec![("a", 3.0), ("c", 5.0)]);
        assert_eq!(nb.values_for("k", &members).len(), 3);
    }

    #[test]
    fn aggregate_operations() {
        let v = [3.0, 9.0, 6.0];
        assert_eq!(aggregate(&v, Aggregate::Max), 9.0);
        assert_eq!(aggregate(&v, Aggregate::Min), 3.0);
        assert_eq!(aggregate(&v, Aggregate::Sum), 18.0);
        assert_eq!(aggregate(&v, Aggregate::Avg), 6.0);
    }

    #[test]
    fn aggregate_of_nothing_is_zero() {
        for op in [Aggregate::Max, Aggregate::Min, Aggregate::Sum, Aggregate::Avg] {
            assert_eq!(aggregate(&[], op), 0.0);
        }
    }

    #[test]
    fn extremum_ties_go_to_first() {
        let c = [("a", 2.0), ("b", 9.0), ("c", 9.0), ("d", 1.0)];
        assert_eq!(device_with_extremum(&c, Extremum::Max), Some("b"));
        assert_eq!(device_with_extremum(&c, Extremum::Min), Some("d"));
        assert_eq!(device_with_extremum(&[], Extremum::Min), None);
    }

    #[test]
    fn shared_partitions_by_group() {
        let mut shared = SharedNotebook::new();
        shared.set(None, "k", Value::from(1));
        shared.set(Some("red"), "k", Value::from(2));
        shared.set(Some(""), "k", Value::from(3));
        assert_eq!(shared.get(None, "k"), Some(&Value::from(1)));
        assert_eq!(shared.get(Some("red"), "k"), Some(&Value::from(2)));
        assert_eq!(shared.get(Some(""), "k"), Some(&Value::from(3)));
        assert_eq!(shared.delete(Some("red"), "k"), Some(Value::from(2)));
        assert_eq!(shared.get(Some("red"), "k"), None);
        assert_eq!(shared.keys(None), vec!["k"]);
    }

    #[test]
    fn parse_operations() {
        assert_eq!("AVG".parse::<Aggregate>().unwrap(), Aggregate::Avg);
        assert_eq!("min".parse::<Extremum>().unwrap(), Extremum::Min);
        assert!("sum".parse::<Extremum>().is_err());
        assert!("median".parse::<Aggregate>().is_err());
    }
}
